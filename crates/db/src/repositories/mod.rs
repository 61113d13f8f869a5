use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use resourcing_core::change_log::{Change, ChangeSet};
use resourcing_core::domain::approval::{Approval, ApprovalId};
use resourcing_core::domain::comment::{Comment, CommentId};
use resourcing_core::domain::notification_task::{NotificationTask, NotificationTaskId};
use resourcing_core::domain::resourcing_request::{ResourcingRequest, ResourcingRequestId};
use resourcing_core::domain::user::{Profession, ProfessionId, User, UserId};
use resourcing_core::errors::DomainError;
use resourcing_core::event_log::{EntityRef, Event, EventContext, EventType};
use resourcing_core::workflow::WorkflowCommit;

pub mod approval;
pub mod change_log;
pub mod comment;
pub mod event;
pub mod notification_queue;
pub mod request;
pub mod user;

pub use approval::SqlApprovalRepository;
pub use change_log::SqlChangeLogRepository;
pub use comment::SqlCommentRepository;
pub use event::SqlEventRepository;
pub use notification_queue::SqlNotificationQueueRepository;
pub use request::SqlResourcingRequestRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[async_trait]
pub trait ResourcingRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ResourcingRequestId,
    ) -> Result<Option<ResourcingRequest>, RepositoryError>;

    async fn list(&self) -> Result<Vec<ResourcingRequest>, RepositoryError>;

    /// Persists everything in the commit in one transaction. Field-level
    /// changes are written only after that transaction has committed.
    async fn commit(&self, commit: &WorkflowCommit) -> Result<(), RepositoryError>;

    /// Records the commit's events and removes the request with everything it owns.
    async fn delete(&self, commit: &WorkflowCommit) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn add_event(
        &self,
        entity: &EntityRef,
        user_id: Option<UserId>,
        event_type: EventType,
        context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Result<Event, RepositoryError>;

    async fn list_for_entity(&self, entity: &EntityRef) -> Result<Vec<Event>, RepositoryError>;
}

#[async_trait]
pub trait ChangeLogRepository: Send + Sync {
    async fn list_for_entity(&self, entity: &EntityRef) -> Result<Vec<Change>, RepositoryError>;

    async fn changes_since_creation(&self, entity: &EntityRef)
        -> Result<ChangeSet, RepositoryError>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn find_by_id(&self, id: &CommentId) -> Result<Option<Comment>, RepositoryError>;

    /// Newest first.
    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<Comment>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;

    /// Every decision ever recorded, including superseded ones, newest first.
    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<Approval>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
    async fn save(&self, user: &User) -> Result<(), RepositoryError>;
    async fn find_profession(&self, id: &ProfessionId)
        -> Result<Option<Profession>, RepositoryError>;
    async fn save_profession(&self, profession: &Profession) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NotificationQueueRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &NotificationTaskId,
    ) -> Result<Option<NotificationTask>, RepositoryError>;

    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<NotificationTask>, RepositoryError>;

    /// Moves up to `limit` due tasks to running and returns them with the
    /// attempt counter already incremented.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationTask>, RepositoryError>;

    async fn mark_sent(
        &self,
        id: &NotificationTaskId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn schedule_retry(
        &self,
        id: &NotificationTaskId,
        error: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(
        &self,
        id: &NotificationTaskId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub(crate) fn decode_json<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T>(column: &str, value: &T) -> Result<String, RepositoryError>
where
    T: serde::Serialize,
{
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

const DATE_FORMAT: &str = "%Y-%m-%d";
