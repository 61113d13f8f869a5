//! Approval ordering and approver authorization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::ApprovalType;
use crate::domain::resourcing_request::ResourcingRequest;
use crate::domain::user::User;

pub type Tier = BTreeSet<ApprovalType>;

/// Ordered tiers of approval types. Members of one tier may be decided in any
/// order, but only once every earlier tier is fully decided.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOrder {
    tiers: Vec<Tier>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalOrderError {
    #[error("approval order must contain at least one tier")]
    Empty,
    #[error("approval order tier {index} is empty")]
    EmptyTier { index: usize },
    #[error("approval type `{}` appears more than once in the approval order", .0.as_str())]
    Duplicate(ApprovalType),
    #[error("approval type `{}` is missing from the approval order", .0.as_str())]
    Missing(ApprovalType),
    #[error("unknown approval type `{0}` in approval order")]
    UnknownType(String),
}

impl ApprovalOrder {
    /// Validates that every approval type appears exactly once.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, ApprovalOrderError> {
        if tiers.is_empty() {
            return Err(ApprovalOrderError::Empty);
        }

        let mut seen = BTreeSet::new();
        for (index, tier) in tiers.iter().enumerate() {
            if tier.is_empty() {
                return Err(ApprovalOrderError::EmptyTier { index });
            }
            for approval_type in tier {
                if !seen.insert(*approval_type) {
                    return Err(ApprovalOrderError::Duplicate(*approval_type));
                }
            }
        }

        if let Some(missing) =
            ApprovalType::ALL.into_iter().find(|approval_type| !seen.contains(approval_type))
        {
            return Err(ApprovalOrderError::Missing(missing));
        }

        Ok(Self { tiers })
    }

    /// Builds an order from storage keys such as `[["head_of_profession"], ["chief"], ...]`.
    pub fn from_keys<S>(tiers: &[Vec<S>]) -> Result<Self, ApprovalOrderError>
    where
        S: AsRef<str>,
    {
        let tiers = tiers
            .iter()
            .map(|tier| {
                tier.iter()
                    .map(|key| {
                        ApprovalType::parse(key.as_ref())
                            .ok_or_else(|| ApprovalOrderError::UnknownType(key.as_ref().to_string()))
                    })
                    .collect::<Result<Tier, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tiers)
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier_index(&self, approval_type: ApprovalType) -> Option<usize> {
        self.tiers.iter().position(|tier| tier.contains(&approval_type))
    }

    pub fn next_tier(&self, index: usize) -> Option<&Tier> {
        self.tiers.get(index + 1)
    }

    pub fn to_keys(&self) -> Vec<Vec<String>> {
        self.tiers
            .iter()
            .map(|tier| tier.iter().map(|approval_type| approval_type.as_str().to_string()).collect())
            .collect()
    }
}

impl Default for ApprovalOrder {
    fn default() -> Self {
        use ApprovalType::{Busops, Chief, Commercial, DgCoo, Director, Finance, HeadOfProfession, Hrbp};

        Self {
            tiers: vec![
                Tier::from([HeadOfProfession]),
                Tier::from([Chief]),
                Tier::from([Busops]),
                Tier::from([Hrbp, Finance, Commercial]),
                Tier::from([Director]),
                Tier::from([DgCoo]),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalValidationFailure {
    MissingPermission { approval_type: ApprovalType },
    NotNominatedChief,
    ProfessionMismatch,
}

impl ApprovalValidationFailure {
    fn reason(&self) -> String {
        match self {
            Self::MissingPermission { approval_type } => {
                format!("user cannot give {} approval", approval_type.label())
            }
            Self::NotNominatedChief => {
                "only the nominated chief can give Chief approval".to_string()
            }
            Self::ProfessionMismatch => {
                "Head of Profession approval must come from the request's profession".to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalValidationResult {
    pub allowed: bool,
    pub reason: String,
    pub failure: Option<ApprovalValidationFailure>,
}

impl ApprovalValidationResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), failure: None }
    }

    fn deny(failure: ApprovalValidationFailure) -> Self {
        Self { allowed: false, reason: failure.reason(), failure: Some(failure) }
    }
}

/// Decides whether a user may record a decision for an approval type on a request.
#[derive(Clone, Debug, Default)]
pub struct ApprovalValidator;

impl ApprovalValidator {
    pub fn validate(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        approval_type: ApprovalType,
    ) -> ApprovalValidationResult {
        if !actor.has_approval_permission(approval_type) {
            return ApprovalValidationResult::deny(ApprovalValidationFailure::MissingPermission {
                approval_type,
            });
        }

        match approval_type {
            ApprovalType::Chief if !actor.is_superuser => {
                let nominated = request.details.chief.as_ref().map(|chief| &chief.id);
                if nominated != Some(&actor.id) {
                    return ApprovalValidationResult::deny(
                        ApprovalValidationFailure::NotNominatedChief,
                    );
                }
            }
            ApprovalType::HeadOfProfession if !actor.is_superuser => {
                if actor.profession.as_ref() != Some(&request.details.profession.id) {
                    return ApprovalValidationResult::deny(
                        ApprovalValidationFailure::ProfessionMismatch,
                    );
                }
            }
            _ => {}
        }

        ApprovalValidationResult::allow(format!(
            "user `{}` may give {} approval",
            actor.id.0,
            approval_type.label()
        ))
    }
}
