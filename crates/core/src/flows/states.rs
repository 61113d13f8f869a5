use serde::{Deserialize, Serialize};

use crate::domain::documents::DocumentKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    AwaitingApprovals,
    Amending,
    AmendmentsReview,
    Approved,
    Completed,
}

impl RequestState {
    pub const ALL: [RequestState; 6] = [
        Self::Draft,
        Self::AwaitingApprovals,
        Self::Amending,
        Self::AmendmentsReview,
        Self::Approved,
        Self::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::AwaitingApprovals => "awaiting_approvals",
            Self::Amending => "amending",
            Self::AmendmentsReview => "amendments_review",
            Self::Approved => "approved",
            Self::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::AwaitingApprovals => "Awaiting approvals",
            Self::Amending => "Amending",
            Self::AmendmentsReview => "Amendments review",
            Self::Approved => "Approved",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|state| state.as_str() == key)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Edit,
    SendForApproval,
    Amend,
    SendForReview,
    FinishAmendmentsReview,
    AllApprovalsGiven,
    MarkAsComplete,
}

/// Facts the flow needs that are not part of the state itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowContext {
    pub missing_documents: Vec<DocumentKind>,
    pub actor_is_busops: bool,
    pub fully_approved: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowAction {
    NotifyApprovers,
    NotifyBusOpsOfAmendments,
    NotifyRequestorAmendmentsReviewed,
    NotifyClearedApprovers,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RequestState,
    pub to: RequestState,
    pub event: WorkflowEvent,
    pub actions: Vec<WorkflowAction>,
}
