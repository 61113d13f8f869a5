use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::comment::CommentId;
use crate::domain::resourcing_request::ResourcingRequestId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    HeadOfProfession,
    Chief,
    Busops,
    Hrbp,
    Finance,
    Commercial,
    Director,
    DgCoo,
}

impl ApprovalType {
    pub const ALL: [ApprovalType; 8] = [
        Self::HeadOfProfession,
        Self::Chief,
        Self::Busops,
        Self::Hrbp,
        Self::Finance,
        Self::Commercial,
        Self::Director,
        Self::DgCoo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeadOfProfession => "head_of_profession",
            Self::Chief => "chief",
            Self::Busops => "busops",
            Self::Hrbp => "hrbp",
            Self::Finance => "finance",
            Self::Commercial => "commercial",
            Self::Director => "director",
            Self::DgCoo => "dg_coo",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HeadOfProfession => "Head of Profession",
            Self::Chief => "Chief",
            Self::Busops => "BusOps",
            Self::Hrbp => "HRBP",
            Self::Finance => "Finance",
            Self::Commercial => "Commercial",
            Self::Director => "Director",
            Self::DgCoo => "DG COO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|approval_type| approval_type.as_str() == key)
    }
}

/// A single decision for one approval type. Never mutated once created; a new
/// decision for the same type is a new `Approval`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub resourcing_request_id: ResourcingRequestId,
    pub approval_type: ApprovalType,
    /// `Some(true)` approved, `Some(false)` rejected, `None` cleared.
    pub approved: Option<bool>,
    pub user_id: UserId,
    pub reason: Option<CommentId>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(
        resourcing_request_id: ResourcingRequestId,
        approval_type: ApprovalType,
        approved: Option<bool>,
        user_id: UserId,
        reason: Option<CommentId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            resourcing_request_id,
            approval_type,
            approved,
            user_id,
            reason,
            created_at,
        }
    }
}

/// One slot per approval type, each pointing at the latest `Approval` of that type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSlots {
    slots: BTreeMap<ApprovalType, Approval>,
}

impl ApprovalSlots {
    pub fn get(&self, approval_type: ApprovalType) -> Option<&Approval> {
        self.slots.get(&approval_type)
    }

    /// Re-points the slot for the approval's type. The previous approval is
    /// returned so callers can see what was superseded.
    pub fn set(&mut self, approval: Approval) -> Option<Approval> {
        self.slots.insert(approval.approval_type, approval)
    }

    pub fn decision(&self, approval_type: ApprovalType) -> Option<bool> {
        self.get(approval_type).and_then(|approval| approval.approved)
    }

    /// A slot is decided when it holds an approval with a non-null decision.
    /// A cleared slot counts as undecided.
    pub fn is_decided(&self, approval_type: ApprovalType) -> bool {
        self.decision(approval_type).is_some()
    }

    pub fn is_cleared(&self, approval_type: ApprovalType) -> bool {
        self.get(approval_type).is_some_and(|approval| approval.approved.is_none())
    }

    pub fn is_fully_approved(&self) -> bool {
        ApprovalType::ALL.iter().all(|approval_type| self.decision(*approval_type) == Some(true))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ApprovalType, &Approval)> {
        self.slots.iter()
    }

    pub fn cleared_types(&self) -> Vec<ApprovalType> {
        ApprovalType::ALL.into_iter().filter(|approval_type| self.is_cleared(*approval_type)).collect()
    }
}
