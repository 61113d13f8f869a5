//! Field-level change capture.
//!
//! Every save of a tracked entity is diffed against the stored version using
//! display values (enum labels, formatted money) rather than raw storage values.
//! The resulting [`Change`] is staged and only released once the enclosing
//! transaction commits, so a rolled back save leaves no trace.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_log::EntityRef;

/// Field name to display value. `None` is an unset field.
pub type FieldValues = BTreeMap<&'static str, Option<String>>;

/// Field name to the display value it held before a save.
pub type ChangeSet = BTreeMap<String, Option<String>>;

pub trait Tracked {
    fn display_values(&self) -> FieldValues;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub entity: EntityRef,
    pub changes: ChangeSet,
    pub timestamp: DateTime<Utc>,
}

/// Prior display values of every field whose display value differs between
/// `before` and `after`. Returns `None` when nothing visible changed.
pub fn diff<T>(entity: EntityRef, before: &T, after: &T, timestamp: DateTime<Utc>) -> Option<Change>
where
    T: Tracked,
{
    let previous = before.display_values();
    let next = after.display_values();

    let changes: ChangeSet = previous
        .iter()
        .filter(|(field, value)| next.get(*field) != Some(*value))
        .map(|(field, value)| ((*field).to_string(), value.clone()))
        .collect();

    if changes.is_empty() {
        return None;
    }

    Some(Change { id: Uuid::new_v4().to_string(), entity, changes, timestamp })
}

/// Cumulative "changed since creation" view: for every field the prior value
/// recorded by the oldest change wins, so the result is the value the field had
/// when the entity was created.
///
/// Changes sharing a timestamp keep the order they are given in, which the
/// change-log repository supplies as insertion order.
pub fn merge_changes(changes: &[Change]) -> ChangeSet {
    let mut ordered: Vec<&Change> = changes.iter().collect();
    ordered.sort_by_key(|change| change.timestamp);

    let mut merged = ChangeSet::new();
    for change in ordered {
        for (field, value) in &change.changes {
            merged.entry(field.clone()).or_insert_with(|| value.clone());
        }
    }
    merged
}

/// Changes computed during a unit of work, held back until it commits.
#[derive(Debug, Default)]
pub struct ChangeStage {
    pending: Vec<Change>,
}

impl ChangeStage {
    pub fn stage<T>(&mut self, entity: EntityRef, before: &T, after: &T, timestamp: DateTime<Utc>)
    where
        T: Tracked,
    {
        if let Some(change) = diff(entity, before, after, timestamp) {
            self.pending.push(change);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Commit callback: hands the staged changes over for persistence.
    pub fn committed(self) -> Vec<Change> {
        self.pending
    }

    /// Rollback callback: staged changes are discarded.
    pub fn rolled_back(self) {}
}

pub fn display_bool(value: Option<bool>) -> Option<String> {
    value.map(|flag| if flag { "Yes" } else { "No" }.to_string())
}

pub fn display_date(value: NaiveDate) -> Option<String> {
    Some(value.format("%Y-%m-%d").to_string())
}

pub fn display_text(value: &str) -> Option<String> {
    Some(value.to_string())
}

pub fn display_optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

/// Money rendered the way the request summary shows it: `£` and thousands separators.
pub fn display_money(value: Option<Decimal>) -> Option<String> {
    value.map(format_money)
}

pub fn format_money(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero).normalize();
    let negative = rounded.is_sign_negative();
    let raw = rounded.abs().to_string();
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole.to_string(), Some(fraction.to_string())),
        None => (raw, None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if negative { "-" } else { "" };
    match fraction {
        Some(fraction) => format!("{sign}£{grouped}.{fraction:0<2}"),
        None => format!("{sign}£{grouped}"),
    }
}
