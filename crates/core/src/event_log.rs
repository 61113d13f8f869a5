//! Append-only business event history.
//!
//! Descriptions are rendered when the event is written so that historic wording
//! stays fixed if templates change later.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::user::UserId;

/// Generic (entity kind, entity id) key for anything with a history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }
}

pub trait Loggable {
    fn entity_ref(&self) -> EntityRef;
}

impl Loggable for EntityRef {
    fn entity_ref(&self) -> EntityRef {
        self.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    SentForApproval,
    Amending,
    SentForReview,
    ReviewedAmendments,
    GroupApproved,
    GroupRejected,
    ApprovalCleared,
    Commented,
    Approved,
    Deleted,
    Completed,
}

impl EventType {
    pub const ALL: [EventType; 13] = [
        Self::Created,
        Self::Updated,
        Self::SentForApproval,
        Self::Amending,
        Self::SentForReview,
        Self::ReviewedAmendments,
        Self::GroupApproved,
        Self::GroupRejected,
        Self::ApprovalCleared,
        Self::Commented,
        Self::Approved,
        Self::Deleted,
        Self::Completed,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::SentForApproval => "sent_for_approval",
            Self::Amending => "amending",
            Self::SentForReview => "sent_for_review",
            Self::ReviewedAmendments => "reviewed_amendments",
            Self::GroupApproved => "group_approved",
            Self::GroupRejected => "group_rejected",
            Self::ApprovalCleared => "approval_cleared",
            Self::Commented => "commented",
            Self::Approved => "approved",
            Self::Deleted => "deleted",
            Self::Completed => "completed",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        let key = code.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|event_type| event_type.code() == key)
    }

    pub fn template(&self) -> &'static str {
        match self {
            Self::Created => "Created a {object}",
            Self::Updated => "Updated a {object}",
            Self::SentForApproval => "Sent the resourcing request for approval",
            Self::Amending => "Amending the resourcing request",
            Self::SentForReview => "Sent the amendments for review",
            Self::ReviewedAmendments => "Reviewed the amendments",
            Self::GroupApproved => "{group} approved the resourcing request",
            Self::GroupRejected => "{group} rejected the resourcing request",
            Self::ApprovalCleared => "{group} approval was cleared",
            Self::Commented => "Commented on the resourcing request",
            Self::Approved => "The resourcing request was approved",
            Self::Deleted => "Deleted a {object}",
            Self::Completed => "Marked the resourcing request as complete",
        }
    }

    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Created | Self::Updated | Self::Deleted => &["object"],
            Self::GroupApproved | Self::GroupRejected | Self::ApprovalCleared => &["group"],
            Self::SentForApproval
            | Self::Amending
            | Self::SentForReview
            | Self::ReviewedAmendments
            | Self::Commented
            | Self::Approved
            | Self::Completed => &[],
        }
    }

    /// Renders the template. The context keys must be exactly the required keys.
    pub fn render(&self, context: &EventContext) -> Result<String, EventLogError> {
        let required: BTreeSet<&str> = self.required_keys().iter().copied().collect();
        let supplied: BTreeSet<&str> = context.keys().map(String::as_str).collect();
        if required != supplied {
            return Err(EventLogError::InvalidContext {
                event_type: *self,
                expected: required.into_iter().map(str::to_string).collect(),
                supplied: supplied.into_iter().map(str::to_string).collect(),
            });
        }

        let mut description = self.template().to_string();
        for (key, value) in context {
            description = description.replace(&format!("{{{key}}}"), value);
        }
        Ok(description)
    }
}

pub type EventContext = BTreeMap<String, String>;

pub fn context<const N: usize>(pairs: [(&str, String); N]) -> EventContext {
    pairs.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventLogError {
    #[error("invalid context for event `{}`: expected keys {expected:?}, got {supplied:?}", .event_type.code())]
    InvalidContext { event_type: EventType, expected: Vec<String>, supplied: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub entity: EntityRef,
    pub event_type: EventType,
    pub description: String,
    pub user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn build<L>(
        entity: &L,
        user_id: Option<UserId>,
        event_type: EventType,
        context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EventLogError>
    where
        L: Loggable + ?Sized,
    {
        let description = event_type.render(context)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            entity: entity.entity_ref(),
            event_type,
            description,
            user_id,
            timestamp,
        })
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_for(&self, entity: &EntityRef) -> Vec<Event> {
        self.events().into_iter().filter(|event| &event.entity == entity).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

pub struct EventLogService<S> {
    sink: S,
}

impl<S> EventLogService<S>
where
    S: EventSink,
{
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Validates and renders the event before anything reaches the sink.
    pub fn add_event<L>(
        &self,
        entity: &L,
        user_id: Option<UserId>,
        event_type: EventType,
        context: &EventContext,
    ) -> Result<Event, EventLogError>
    where
        L: Loggable + ?Sized,
    {
        let event = Event::build(entity, user_id, event_type, context, Utc::now())?;
        self.sink.record(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        context, EntityRef, EventContext, EventLogError, EventLogService, EventType,
        InMemoryEventSink,
    };
    use crate::domain::user::UserId;

    fn entity() -> EntityRef {
        EntityRef::new("resourcing_request", "RR-7")
    }

    #[test]
    fn description_is_rendered_from_context() {
        let sink = InMemoryEventSink::default();
        let service = EventLogService::new(sink.clone());

        let event = service
            .add_event(
                &entity(),
                Some(UserId("u-1".to_string())),
                EventType::GroupApproved,
                &context([("group", "HRBP".to_string())]),
            )
            .expect("valid context");

        assert_eq!(event.description, "HRBP approved the resourcing request");
        assert_eq!(sink.events_for(&entity()), vec![event]);
    }

    #[test]
    fn missing_or_extra_context_keys_are_rejected_without_recording() {
        let sink = InMemoryEventSink::default();
        let service = EventLogService::new(sink.clone());

        let missing = service.add_event(&entity(), None, EventType::Created, &EventContext::new());
        assert!(matches!(missing, Err(EventLogError::InvalidContext { .. })));

        let extra = service.add_event(
            &entity(),
            None,
            EventType::Commented,
            &context([("group", "Finance".to_string())]),
        );
        assert!(matches!(extra, Err(EventLogError::InvalidContext { .. })));

        assert!(sink.events().is_empty());
    }

    #[test]
    fn every_template_renders_with_its_required_keys() {
        for event_type in EventType::ALL {
            let context: EventContext = event_type
                .required_keys()
                .iter()
                .map(|key| (key.to_string(), "X".to_string()))
                .collect();
            let description = event_type.render(&context).expect("required keys supplied");
            assert!(!description.contains('{'), "{description}");
            assert_eq!(EventType::parse(event_type.code()), Some(event_type));
        }
    }
}
