pub mod approvals;
pub mod change_log;
pub mod completeness;
pub mod config;
pub mod domain;
pub mod errors;
pub mod event_log;
pub mod flows;
pub mod notifications;
pub mod review;
pub mod workflow;

pub use approvals::{
    ApprovalOrder, ApprovalOrderError, ApprovalValidationFailure, ApprovalValidationResult,
    ApprovalValidator,
};
pub use change_log::{Change, ChangeSet, ChangeStage, Tracked};
pub use completeness::RequiredDocumentsPolicy;
pub use domain::approval::{Approval, ApprovalId, ApprovalSlots, ApprovalType};
pub use domain::comment::{Comment, CommentId};
pub use domain::documents::{DocumentKind, SupportingDocument, SupportingDocuments};
pub use domain::notification_task::{NotificationTask, NotificationTaskId, NotificationTaskState};
pub use domain::resourcing_request::{
    RequestDetails, RequestType, ResourcingRequest, ResourcingRequestId,
};
pub use domain::user::{Permission, Profession, ProfessionId, User, UserId, UserRef};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use event_log::{EntityRef, Event, EventLogError, EventType, Loggable};
pub use flows::{FlowEngine, FlowTransitionError, RequestState, ResourcingFlow, WorkflowEvent};
pub use notifications::{NotificationDispatcher, NotificationJob, NotificationScenario};
pub use review::{Review, ReviewAction, ReviewService};
pub use workflow::{DocumentChange, WorkflowCommit, WorkflowService};
