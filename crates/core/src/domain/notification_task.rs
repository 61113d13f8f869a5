use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::resourcing_request::ResourcingRequestId;
use crate::notifications::NotificationJob;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationTaskId(pub String);

impl NotificationTaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTaskState {
    Queued,
    Running,
    RetryableFailed,
    Sent,
    Failed,
}

impl NotificationTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::RetryableFailed => "retryable_failed",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "retryable_failed" => Some(Self::RetryableFailed),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Queued | Self::RetryableFailed)
    }
}

/// One queued notification job. Rows are written in the same transaction as
/// the workflow change that produced them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub id: NotificationTaskId,
    pub request_id: ResourcingRequestId,
    pub job: NotificationJob,
    pub state: NotificationTaskState,
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTask {
    pub fn queued(job: NotificationJob, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationTaskId::generate(),
            request_id: job.request_id().clone(),
            job,
            state: NotificationTaskState::Queued,
            attempts: 0,
            available_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What to do with a task whose delivery attempt just failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    GiveUp,
}

/// `attempts` counts the attempt that just failed. A delay too large to
/// represent gives up instead of scheduling.
pub fn retry_decision(
    attempts: u32,
    max_attempts: u32,
    retry_delay_secs: u64,
    now: DateTime<Utc>,
) -> RetryDecision {
    if attempts >= max_attempts {
        return RetryDecision::GiveUp;
    }
    i64::try_from(retry_delay_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .map_or(RetryDecision::GiveUp, RetryDecision::RetryAt)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{retry_decision, NotificationTask, NotificationTaskState, RetryDecision};
    use crate::domain::resourcing_request::ResourcingRequestId;
    use crate::notifications::NotificationJob;

    #[test]
    fn task_state_round_trips_through_storage_keys() {
        for state in [
            NotificationTaskState::Queued,
            NotificationTaskState::Running,
            NotificationTaskState::RetryableFailed,
            NotificationTaskState::Sent,
            NotificationTaskState::Failed,
        ] {
            assert_eq!(NotificationTaskState::parse(state.as_str()), Some(state));
        }
        assert!(NotificationTaskState::RetryableFailed.is_claimable());
        assert!(!NotificationTaskState::Sent.is_claimable());
    }

    #[test]
    fn queued_task_takes_request_id_from_job() {
        let job = NotificationJob::AmendmentsSubmitted {
            request_id: ResourcingRequestId("RR-1".to_string()),
        };
        let task = NotificationTask::queued(job, Utc::now());
        assert_eq!(task.request_id.0, "RR-1");
        assert_eq!(task.state, NotificationTaskState::Queued);
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn retries_until_attempts_are_exhausted() {
        let now = Utc::now();
        assert_eq!(retry_decision(1, 3, 60, now), RetryDecision::RetryAt(now + Duration::seconds(60)));
        assert_eq!(retry_decision(3, 3, 60, now), RetryDecision::GiveUp);
    }

    #[test]
    fn unrepresentable_delay_gives_up_without_panicking() {
        let now = Utc::now();
        assert_eq!(retry_decision(1, 3, u64::MAX, now), RetryDecision::GiveUp);
        assert_eq!(retry_decision(1, 3, i64::MAX as u64, now), RetryDecision::GiveUp);
    }
}
