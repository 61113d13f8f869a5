use chrono::{DateTime, Duration, TimeZone, Utc};
use resourcing_core::domain::approval::ApprovalType;
use resourcing_core::domain::comment::Comment;
use resourcing_core::domain::documents::{DocumentKind, JobDescription, SupportingDocument};
use resourcing_core::domain::notification_task::NotificationTaskState;
use resourcing_core::domain::resourcing_request::{ResourcingRequest, ResourcingRequestId};
use resourcing_core::domain::user::{User, UserId};
use resourcing_core::errors::DomainError;
use resourcing_core::event_log::{EntityRef, EventType, Loggable};
use resourcing_core::flows::RequestState;
use resourcing_core::notifications::NotificationJob;
use resourcing_core::review::{Review, ReviewAction, ReviewService};
use resourcing_core::workflow::{document_entity, WorkflowService};
use resourcing_db::{
    connect_with_settings, migrations, ChangeLogRepository, DbPool, EventRepository,
    NotificationQueueRepository, RepositoryError, ResourcingRequestRepository, SeedDataset,
    SqlChangeLogRepository, SqlEventRepository, SqlNotificationQueueRepository,
    SqlResourcingRequestRepository, SqlUserRepository, UserRepository,
};

const DRAFT_REQUEST: &str = "seed-request-inside-ir35";
const SUBMITTED_REQUEST: &str = "seed-request-outside-ir35";

struct Store {
    pool: DbPool,
    requests: SqlResourcingRequestRepository,
    users: SqlUserRepository,
    events: SqlEventRepository,
    changes: SqlChangeLogRepository,
    queue: SqlNotificationQueueRepository,
}

impl Store {
    async fn seeded() -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SeedDataset::load(&pool).await.expect("seed");

        Self {
            requests: SqlResourcingRequestRepository::new(pool.clone()),
            users: SqlUserRepository::new(pool.clone()),
            events: SqlEventRepository::new(pool.clone()),
            changes: SqlChangeLogRepository::new(pool.clone()),
            queue: SqlNotificationQueueRepository::new(pool.clone()),
            pool,
        }
    }

    async fn request(&self, id: &str) -> ResourcingRequest {
        self.requests
            .find_by_id(&ResourcingRequestId(id.to_string()))
            .await
            .expect("load request")
            .expect("request exists")
    }

    async fn user(&self, id: &str) -> User {
        self.users.find_by_id(&UserId(id.to_string())).await.expect("load user").expect("user exists")
    }

    async fn approver(&self, approval_type: ApprovalType) -> User {
        let id = match approval_type {
            ApprovalType::Chief => "seed-chief".to_string(),
            other => format!("seed-{}", other.as_str().replace('_', "-")),
        };
        self.user(&id).await
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.pool).await.expect("count")
    }

    /// Approval, comment, event and notification task rows for one request.
    async fn footprint(&self, request_id: &str) -> [i64; 4] {
        let mut counts = [0; 4];
        let queries = [
            "SELECT COUNT(1) FROM approval WHERE resourcing_request_id = ?",
            "SELECT COUNT(1) FROM comment WHERE resourcing_request_id = ?",
            "SELECT COUNT(1) FROM event WHERE entity_kind = 'resourcing_request' AND entity_id = ?",
            "SELECT COUNT(1) FROM notification_task WHERE resourcing_request_id = ?",
        ];
        for (count, sql) in counts.iter_mut().zip(queries) {
            *count = sqlx::query_scalar(sql)
                .bind(request_id)
                .fetch_one(&self.pool)
                .await
                .expect("count");
        }
        counts
    }
}

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).single().expect("valid timestamp")
        + Duration::minutes(minutes)
}

fn approve(approval_type: ApprovalType) -> Review {
    Review::new(ReviewAction::Approve).with_approval_type(approval_type)
}

#[tokio::test]
async fn committed_edit_records_prior_values_after_the_transaction() {
    let store = Store::seeded().await;
    let workflow = WorkflowService::default();
    let requestor = store.user("seed-requestor").await;
    let request = store.request(DRAFT_REQUEST).await;

    let mut details = request.details.clone();
    details.job_title = "Lead Python Developer".to_string();
    let first = workflow.update_request(&requestor, &request, details, at(0)).expect("edit");
    store.requests.commit(&first).await.expect("commit first edit");

    let mut details = first.request.details.clone();
    details.job_title = "Principal Python Developer".to_string();
    let second =
        workflow.update_request(&requestor, &first.request, details, at(5)).expect("edit again");
    store.requests.commit(&second).await.expect("commit second edit");

    let entity = request.entity_ref();
    assert_eq!(store.changes.list_for_entity(&entity).await.expect("changes").len(), 2);
    let merged = store.changes.changes_since_creation(&entity).await.expect("merged");
    assert_eq!(merged.get("job_title"), Some(&Some("Python Developer".to_string())));

    let reloaded = store.request(DRAFT_REQUEST).await;
    assert_eq!(reloaded.details.job_title, "Principal Python Developer");
}

#[tokio::test]
async fn failed_commit_leaves_no_trace() {
    let store = Store::seeded().await;
    let workflow = WorkflowService::default();
    let requestor = store.user("seed-requestor").await;
    let request = store.request(DRAFT_REQUEST).await;
    let events_before = store.events.list_for_entity(&request.entity_ref()).await.expect("events");

    let mut details = request.details.clone();
    details.job_title = "Data Engineer".to_string();
    let mut commit = workflow.update_request(&requestor, &request, details, at(0)).expect("edit");
    // The comment author does not exist, so the insert violates a foreign key.
    commit.comment =
        Some(Comment::new(request.id.clone(), UserId("nobody".to_string()), "hello", at(0)));

    let error = store.requests.commit(&commit).await.expect_err("foreign key violation");
    assert!(matches!(error, RepositoryError::Database(_)), "{error:?}");

    let reloaded = store.request(DRAFT_REQUEST).await;
    assert_eq!(reloaded.details.job_title, "Python Developer");
    assert!(store.changes.list_for_entity(&request.entity_ref()).await.expect("changes").is_empty());
    let events_after = store.events.list_for_entity(&request.entity_ref()).await.expect("events");
    assert_eq!(events_after.len(), events_before.len());
}

#[tokio::test]
async fn replacing_a_document_tracks_its_own_history() {
    let store = Store::seeded().await;
    let workflow = WorkflowService::default();
    let requestor = store.user("seed-requestor").await;
    let request = store.request(DRAFT_REQUEST).await;

    let replacement = SupportingDocument::JobDescription(JobDescription {
        role_description: "Own the ingestion pipelines".to_string(),
    });
    let commit =
        workflow.save_document(&requestor, &request, replacement.clone(), at(0)).expect("save");
    store.requests.commit(&commit).await.expect("commit");

    let reloaded = store.request(DRAFT_REQUEST).await;
    assert_eq!(reloaded.documents.get(DocumentKind::JobDescription), Some(&replacement));

    let entity = document_entity(&request, DocumentKind::JobDescription);
    let merged = store.changes.changes_since_creation(&entity).await.expect("merged");
    assert_eq!(
        merged.get("role_description"),
        Some(&Some("Build and maintain data pipelines".to_string()))
    );
}

#[tokio::test]
async fn notification_jobs_are_queued_with_the_change() {
    let store = Store::seeded().await;
    let reviews = ReviewService::default();
    let request = store.request(SUBMITTED_REQUEST).await;
    let hop = store.approver(ApprovalType::HeadOfProfession).await;

    let commit = reviews
        .add_review(&hop, &request, &approve(ApprovalType::HeadOfProfession), at(0))
        .expect("approve");
    store.requests.commit(&commit).await.expect("commit");

    let tasks = store.queue.list_for_request(&request.id).await.expect("tasks");
    assert_eq!(tasks.len(), commit.jobs.len());
    assert!(tasks.iter().all(|task| task.state == NotificationTaskState::Queued));
    assert!(tasks.iter().any(|task| matches!(task.job, NotificationJob::ApprovalDecision { .. })));

    let reloaded = store.request(SUBMITTED_REQUEST).await;
    assert_eq!(reloaded.approvals.decision(ApprovalType::HeadOfProfession), Some(true));
}

#[tokio::test]
async fn decision_against_a_fully_approved_request_is_rejected() {
    let store = Store::seeded().await;
    let reviews = ReviewService::default();
    let mut request = store.request(SUBMITTED_REQUEST).await;

    let (last, earlier) = ApprovalType::ALL.split_last().expect("approval types");
    for (offset, approval_type) in earlier.iter().enumerate() {
        let approver = store.approver(*approval_type).await;
        let commit = reviews
            .add_review(&approver, &request, &approve(*approval_type), at(offset as i64))
            .expect("approve");
        store.requests.commit(&commit).await.expect("commit");
        request = commit.request;
    }

    // Two decisions prepared from the same snapshot; only the first may land.
    let approver = store.approver(*last).await;
    let winner = reviews.add_review(&approver, &request, &approve(*last), at(30)).expect("winner");
    let loser = reviews.add_review(&approver, &request, &approve(*last), at(31)).expect("loser");

    store.requests.commit(&winner).await.expect("commit winner");
    let error = store.requests.commit(&loser).await.expect_err("already approved");
    assert!(matches!(error, RepositoryError::Domain(DomainError::AlreadyApproved)));

    let reloaded = store.request(SUBMITTED_REQUEST).await;
    assert_eq!(reloaded.state, RequestState::Approved);
    assert!(reloaded.is_approved());
    assert_eq!(
        store
            .count("SELECT COUNT(1) FROM approval WHERE resourcing_request_id = 'seed-request-outside-ir35'")
            .await,
        ApprovalType::ALL.len() as i64
    );
}

#[tokio::test]
async fn deleting_a_request_keeps_its_event_history() {
    let store = Store::seeded().await;
    let workflow = WorkflowService::default();
    let requestor = store.user("seed-requestor").await;
    let request = store.request(DRAFT_REQUEST).await;

    let commit = workflow.delete_request(&requestor, &request, at(0)).expect("delete");
    store.requests.delete(&commit).await.expect("delete request");

    assert!(store
        .requests
        .find_by_id(&request.id)
        .await
        .expect("lookup")
        .is_none());
    assert_eq!(
        store
            .count("SELECT COUNT(1) FROM supporting_document WHERE resourcing_request_id = 'seed-request-inside-ir35'")
            .await,
        0
    );

    let events = store
        .events
        .list_for_entity(&EntityRef::new("resourcing_request", DRAFT_REQUEST))
        .await
        .expect("events");
    assert_eq!(events.first().map(|event| event.event_type), Some(EventType::Deleted));

    let again = store.requests.delete(&commit).await.expect_err("already gone");
    assert!(matches!(again, RepositoryError::NotFound(_)));
}

#[tokio::test]
async fn commit_built_on_a_stale_snapshot_is_a_conflict() {
    let store = Store::seeded().await;
    let workflow = WorkflowService::default();
    let reviews = ReviewService::default();
    let requestor = store.user("seed-requestor").await;
    let hop = store.approver(ApprovalType::HeadOfProfession).await;
    let snapshot = store.request(SUBMITTED_REQUEST).await;

    let amend = workflow.amend(&requestor, &snapshot, at(0)).expect("amend");
    store.requests.commit(&amend).await.expect("commit amend");
    let after_amend = store.footprint(SUBMITTED_REQUEST).await;

    let review = approve(ApprovalType::HeadOfProfession).with_text("Looks good");
    let stale = reviews.add_review(&hop, &snapshot, &review, at(1)).expect("built from snapshot");
    let error = store.requests.commit(&stale).await.expect_err("stale snapshot");
    assert!(matches!(error, RepositoryError::Domain(DomainError::Conflict(_))), "{error:?}");

    let reloaded = store.request(SUBMITTED_REQUEST).await;
    assert_eq!(reloaded.state, RequestState::Amending);
    assert_eq!(reloaded.approvals.decision(ApprovalType::HeadOfProfession), None);
    assert_eq!(reloaded.version, amend.request.version);
    assert_eq!(store.footprint(SUBMITTED_REQUEST).await, after_amend);
}

#[tokio::test]
async fn parallel_final_approvals_let_one_land_and_the_retry_approves() {
    let store = Store::seeded().await;
    let reviews = ReviewService::default();
    let mut request = store.request(SUBMITTED_REQUEST).await;

    let pending = [ApprovalType::Hrbp, ApprovalType::Finance];
    for (offset, approval_type) in
        ApprovalType::ALL.iter().filter(|approval_type| !pending.contains(*approval_type)).enumerate()
    {
        let approver = store.approver(*approval_type).await;
        let commit = reviews
            .add_review(&approver, &request, &approve(*approval_type), at(offset as i64))
            .expect("approve");
        store.requests.commit(&commit).await.expect("commit");
        request = commit.request;
    }

    let hrbp = store.approver(ApprovalType::Hrbp).await;
    let finance = store.approver(ApprovalType::Finance).await;
    let first = reviews.add_review(&hrbp, &request, &approve(ApprovalType::Hrbp), at(30)).expect("hrbp");
    let second = reviews
        .add_review(&finance, &request, &approve(ApprovalType::Finance), at(31))
        .expect("finance");
    assert_eq!(first.request.state, RequestState::AwaitingApprovals);
    assert_eq!(second.request.state, RequestState::AwaitingApprovals);

    store.requests.commit(&first).await.expect("first lands");
    let after_first = store.footprint(SUBMITTED_REQUEST).await;
    let error = store.requests.commit(&second).await.expect_err("second is stale");
    assert!(matches!(error, RepositoryError::Domain(DomainError::Conflict(_))), "{error:?}");
    assert_eq!(store.footprint(SUBMITTED_REQUEST).await, after_first);

    let current = store.request(SUBMITTED_REQUEST).await;
    assert_eq!(current.approvals.decision(ApprovalType::Finance), None);
    let retry = reviews
        .add_review(&finance, &current, &approve(ApprovalType::Finance), at(32))
        .expect("retry");
    store.requests.commit(&retry).await.expect("retry lands");

    let reloaded = store.request(SUBMITTED_REQUEST).await;
    assert!(reloaded.is_approved());
    assert_eq!(reloaded.state, RequestState::Approved);
    let events = store.events.list_for_entity(&reloaded.entity_ref()).await.expect("events");
    assert_eq!(events.iter().filter(|event| event.event_type == EventType::Approved).count(), 1);
}
