pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, ResourcingFlow};
pub use states::{
    RequestState, TransitionOutcome, WorkflowAction, WorkflowContext, WorkflowEvent,
};
