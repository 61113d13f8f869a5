use thiserror::Error;

use crate::domain::documents::DocumentKind;
use crate::flows::states::{
    RequestState, TransitionOutcome, WorkflowAction, WorkflowContext, WorkflowEvent,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> RequestState;
    fn transition(
        &self,
        current: &RequestState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct ResourcingFlow;

impl FlowDefinition for ResourcingFlow {
    fn initial_state(&self) -> RequestState {
        RequestState::Draft
    }

    fn transition(
        &self,
        current: &RequestState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_resourcing(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> RequestState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &RequestState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn can_apply(
        &self,
        current: &RequestState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> bool {
        self.apply(current, event, context).is_ok()
    }
}

impl Default for FlowEngine<ResourcingFlow> {
    fn default() -> Self {
        Self::new(ResourcingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required supporting documents in state {state:?}: {missing:?}")]
    MissingSupportingDocuments { state: RequestState, missing: Vec<DocumentKind> },
    #[error("only BusOps approvers may apply {event:?} in state {state:?}")]
    BusOpsOnly { state: RequestState, event: WorkflowEvent },
    #[error("request cannot become approved before every approval is given")]
    NotFullyApproved,
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RequestState, event: WorkflowEvent },
}

fn transition_resourcing(
    current: &RequestState,
    event: &WorkflowEvent,
    context: &WorkflowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use RequestState::{Amending, AmendmentsReview, Approved, AwaitingApprovals, Completed, Draft};
    use WorkflowAction::{
        NotifyApprovers, NotifyBusOpsOfAmendments, NotifyClearedApprovers,
        NotifyRequestorAmendmentsReviewed,
    };
    use WorkflowEvent::{
        AllApprovalsGiven, Amend, Edit, FinishAmendmentsReview, MarkAsComplete, SendForApproval,
        SendForReview,
    };

    let missing_documents = || FlowTransitionError::MissingSupportingDocuments {
        state: *current,
        missing: context.missing_documents.clone(),
    };

    let (to, actions) = match (current, event) {
        (Draft, Edit) | (Amending, Edit) => (*current, Vec::new()),
        (Draft, SendForApproval) => {
            if !context.missing_documents.is_empty() {
                return Err(missing_documents());
            }
            (AwaitingApprovals, vec![NotifyApprovers])
        }
        (AwaitingApprovals, Amend) | (AmendmentsReview, Amend) => (Amending, Vec::new()),
        (Amending, SendForReview) => (AmendmentsReview, vec![NotifyBusOpsOfAmendments]),
        (AmendmentsReview, FinishAmendmentsReview) => {
            if !context.actor_is_busops {
                return Err(FlowTransitionError::BusOpsOnly { state: *current, event: *event });
            }
            (AwaitingApprovals, vec![NotifyRequestorAmendmentsReviewed, NotifyClearedApprovers])
        }
        (AwaitingApprovals, AllApprovalsGiven) => {
            if !context.fully_approved {
                return Err(FlowTransitionError::NotFullyApproved);
            }
            (Approved, Vec::new())
        }
        (Approved, MarkAsComplete) => {
            if !context.missing_documents.is_empty() {
                return Err(missing_documents());
            }
            (Completed, Vec::new())
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
