//! Drains the notification outbox.
//!
//! Recipients are resolved from committed state when a task runs, so a job
//! queued before a later change still addresses whoever is relevant now.

use std::time::Duration;

use chrono::{DateTime, Utc};
use resourcing_core::config::WorkerConfig;
use resourcing_core::domain::notification_task::{retry_decision, NotificationTask, RetryDecision};
use resourcing_core::notifications::{
    DispatchFacts, InMemoryUserDirectory, NotificationDispatcher,
};
use resourcing_db::{
    ApprovalRepository, CommentRepository, DbPool, NotificationQueueRepository, RepositoryError,
    ResourcingRequestRepository, SqlApprovalRepository, SqlCommentRepository,
    SqlNotificationQueueRepository, SqlResourcingRequestRepository, SqlUserRepository,
    UserRepository,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::notify::NotifyTransport;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerTick {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

enum DeliveryError {
    /// The task can never succeed, for example because its request was deleted.
    Permanent(String),
    Transient(String),
}

impl From<RepositoryError> for DeliveryError {
    fn from(error: RepositoryError) -> Self {
        Self::Transient(error.to_string())
    }
}

pub struct NotificationWorker<'a> {
    queue: SqlNotificationQueueRepository,
    requests: SqlResourcingRequestRepository,
    approvals: SqlApprovalRepository,
    comments: SqlCommentRepository,
    users: SqlUserRepository,
    dispatcher: &'a NotificationDispatcher,
    transport: &'a dyn NotifyTransport,
    settings: WorkerConfig,
}

impl<'a> NotificationWorker<'a> {
    pub fn new(
        pool: DbPool,
        dispatcher: &'a NotificationDispatcher,
        transport: &'a dyn NotifyTransport,
        settings: WorkerConfig,
    ) -> Self {
        Self {
            queue: SqlNotificationQueueRepository::new(pool.clone()),
            requests: SqlResourcingRequestRepository::new(pool.clone()),
            approvals: SqlApprovalRepository::new(pool.clone()),
            comments: SqlCommentRepository::new(pool.clone()),
            users: SqlUserRepository::new(pool),
            dispatcher,
            transport,
            settings,
        }
    }

    /// Polls until `shutdown` flips to true. A tick in progress is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            event_name = "notify.worker.started",
            transport_mode = self.transport.mode(),
            poll_interval_ms = self.settings.poll_interval_ms,
            "notification worker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.run_once(Utc::now()).await {
                        error!(
                            event_name = "notify.worker.tick_failed",
                            error = %error,
                            "notification worker tick failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "notify.worker.stopped", "notification worker stopped");
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<WorkerTick, RepositoryError> {
        let tasks = self.queue.claim_due(now, self.settings.batch_size).await?;
        let mut tick = WorkerTick { claimed: tasks.len(), ..WorkerTick::default() };

        for task in tasks {
            match self.deliver(&task).await {
                Ok(messages) => {
                    self.queue.mark_sent(&task.id, Utc::now()).await?;
                    tick.sent += 1;
                    info!(
                        event_name = "notify.task.sent",
                        task_id = %task.id.0,
                        request_id = %task.request_id.0,
                        job_kind = task.job.kind(),
                        messages,
                        "notification task delivered"
                    );
                }
                Err(DeliveryError::Transient(reason)) => {
                    match retry_decision(
                        task.attempts,
                        self.settings.max_attempts,
                        self.settings.retry_delay_secs,
                        Utc::now(),
                    ) {
                        RetryDecision::RetryAt(available_at) => {
                            self.queue.schedule_retry(&task.id, &reason, available_at, Utc::now()).await?;
                            tick.retried += 1;
                            warn!(
                                event_name = "notify.task.retry_scheduled",
                                task_id = %task.id.0,
                                request_id = %task.request_id.0,
                                job_kind = task.job.kind(),
                                attempts = task.attempts,
                                available_at = %available_at.to_rfc3339(),
                                error = %reason,
                                "notification task will be retried"
                            );
                        }
                        RetryDecision::GiveUp => {
                            self.fail(&task, &reason).await?;
                            tick.failed += 1;
                        }
                    }
                }
                Err(DeliveryError::Permanent(reason)) => {
                    self.fail(&task, &reason).await?;
                    tick.failed += 1;
                }
            }
        }

        Ok(tick)
    }

    async fn fail(&self, task: &NotificationTask, reason: &str) -> Result<(), RepositoryError> {
        self.queue.mark_failed(&task.id, reason, Utc::now()).await?;
        error!(
            event_name = "notify.task.failed",
            task_id = %task.id.0,
            request_id = %task.request_id.0,
            job_kind = task.job.kind(),
            attempts = task.attempts,
            error = %reason,
            "notification task failed permanently"
        );
        Ok(())
    }

    /// Returns the number of messages handed to the transport.
    async fn deliver(&self, task: &NotificationTask) -> Result<usize, DeliveryError> {
        let job = &task.job;
        let request = self.requests.find_by_id(job.request_id()).await?.ok_or_else(|| {
            DeliveryError::Permanent(format!(
                "resourcing request `{}` no longer exists",
                job.request_id().0
            ))
        })?;

        let approval = match job.approval_id() {
            Some(id) => self.approvals.find_by_id(id).await?,
            None => None,
        };
        let comment = match job.comment_id() {
            Some(id) => self.comments.find_by_id(id).await?,
            None => None,
        };
        let directory: InMemoryUserDirectory = self.users.list().await?.into_iter().collect();

        let facts =
            DispatchFacts { request: &request, approval: approval.as_ref(), comment: comment.as_ref() };
        let messages = self
            .dispatcher
            .dispatch(job, &facts, &directory)
            .map_err(|error| DeliveryError::Permanent(error.to_string()))?;

        for message in &messages {
            self.transport.send(message).await.map_err(|error| {
                if error.is_retryable() {
                    DeliveryError::Transient(error.to_string())
                } else {
                    DeliveryError::Permanent(error.to_string())
                }
            })?;
        }

        Ok(messages.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use resourcing_core::approvals::ApprovalOrder;
    use resourcing_core::config::AppConfig;
    use resourcing_core::domain::approval::ApprovalType;
    use resourcing_core::domain::notification_task::NotificationTaskState;
    use resourcing_core::domain::resourcing_request::ResourcingRequestId;
    use resourcing_core::domain::user::UserId;
    use resourcing_core::notifications::{
        NotificationDispatcher, NotificationJob, OutboundMessage, TemplateIds,
    };
    use resourcing_core::review::{Review, ReviewAction, ReviewService};
    use resourcing_db::{
        connect_with_settings, migrations, DbPool, NotificationQueueRepository,
        ResourcingRequestRepository, SeedDataset, SqlNotificationQueueRepository,
        SqlResourcingRequestRepository, SqlUserRepository, UserRepository,
    };

    use super::NotificationWorker;
    use crate::notify::{NotifyTransport, TransportError};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_with: Option<u16>,
    }

    impl RecordingTransport {
        fn recipients(&self) -> Vec<String> {
            let sent = self.sent.lock().expect("lock");
            let mut recipients: Vec<String> =
                sent.iter().map(|message| message.recipient.0.clone()).collect();
            recipients.sort();
            recipients
        }
    }

    #[async_trait]
    impl NotifyTransport for RecordingTransport {
        fn mode(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            if let Some(status) = self.fail_with {
                return Err(TransportError::Rejected { status, body: "unavailable".to_string() });
            }
            self.sent.lock().expect("lock").push(message.clone());
            Ok(())
        }
    }

    fn dispatcher() -> NotificationDispatcher {
        NotificationDispatcher::new(
            ApprovalOrder::default(),
            TemplateIds::default(),
            "https://resourcing.example.gov.uk",
        )
    }

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SeedDataset::load(&pool).await.expect("seed");
        pool
    }

    /// Head of Profession approves the seeded submitted request, queueing jobs.
    async fn approve_head_of_profession(pool: &DbPool) {
        let requests = SqlResourcingRequestRepository::new(pool.clone());
        let users = SqlUserRepository::new(pool.clone());
        let request = requests
            .find_by_id(&ResourcingRequestId("seed-request-outside-ir35".to_string()))
            .await
            .expect("load")
            .expect("seeded");
        let hop = users
            .find_by_id(&UserId("seed-head-of-profession".to_string()))
            .await
            .expect("load user")
            .expect("seeded approver");
        let review =
            Review::new(ReviewAction::Approve).with_approval_type(ApprovalType::HeadOfProfession);
        let commit =
            ReviewService::default().add_review(&hop, &request, &review, Utc::now()).expect("approve");
        requests.commit(&commit).await.expect("commit");
    }

    #[tokio::test]
    async fn delivers_queued_jobs_to_recipients_from_committed_state() {
        let pool = seeded_pool().await;
        approve_head_of_profession(&pool).await;

        let dispatcher = dispatcher();
        let transport = RecordingTransport::default();
        let worker = NotificationWorker::new(
            pool.clone(),
            &dispatcher,
            &transport,
            AppConfig::default().worker,
        );

        let tick = worker.run_once(Utc::now() + Duration::seconds(1)).await.expect("tick");
        assert_eq!(tick.claimed, tick.sent);
        assert_eq!(tick.failed, 0);

        let recipients = transport.recipients();
        assert!(recipients.contains(&"seed-requestor".to_string()), "{recipients:?}");

        let queue = SqlNotificationQueueRepository::new(pool);
        let tasks = queue
            .list_for_request(&ResourcingRequestId("seed-request-outside-ir35".to_string()))
            .await
            .expect("tasks");
        assert!(tasks.iter().all(|task| task.state == NotificationTaskState::Sent));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_attempts_run_out() {
        let pool = seeded_pool().await;
        approve_head_of_profession(&pool).await;

        let dispatcher = dispatcher();
        let transport = RecordingTransport { fail_with: Some(503), ..RecordingTransport::default() };
        let mut settings = AppConfig::default().worker;
        settings.max_attempts = 2;
        settings.retry_delay_secs = 0;
        let worker = NotificationWorker::new(pool.clone(), &dispatcher, &transport, settings);

        let first = worker.run_once(Utc::now() + Duration::seconds(1)).await.expect("first tick");
        assert!(first.retried > 0);
        assert_eq!(first.retried + first.sent, first.claimed);

        let second = worker.run_once(Utc::now() + Duration::seconds(2)).await.expect("second tick");
        assert_eq!(second.claimed, first.retried);
        assert_eq!(second.failed, first.retried);

        let queue = SqlNotificationQueueRepository::new(pool);
        let tasks = queue
            .list_for_request(&ResourcingRequestId("seed-request-outside-ir35".to_string()))
            .await
            .expect("tasks");
        let decision = tasks
            .iter()
            .find(|task| matches!(task.job, NotificationJob::ApprovalDecision { .. }))
            .expect("decision task");
        assert_eq!(decision.state, NotificationTaskState::Failed);
        assert_eq!(decision.attempts, 2);
        assert!(decision.last_error.as_deref().is_some_and(|error| error.contains("503")));
    }

    #[tokio::test]
    async fn jobs_for_deleted_requests_fail_without_sending() {
        let pool = seeded_pool().await;
        approve_head_of_profession(&pool).await;
        sqlx::query("DELETE FROM resourcing_request WHERE id = 'seed-request-outside-ir35'")
            .execute(&pool)
            .await
            .expect("delete request");

        let dispatcher = dispatcher();
        let transport = RecordingTransport::default();
        let worker =
            NotificationWorker::new(pool, &dispatcher, &transport, AppConfig::default().worker);

        let tick = worker.run_once(Utc::now() + Duration::seconds(1)).await.expect("tick");
        assert!(tick.claimed > 0);
        assert_eq!(tick.failed, tick.claimed);
        assert!(transport.recipients().is_empty());
    }
}
