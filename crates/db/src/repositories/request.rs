use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::change_log::{Change, ChangeStage};
use resourcing_core::domain::documents::SupportingDocument;
use resourcing_core::domain::notification_task::NotificationTask;
use resourcing_core::domain::resourcing_request::{
    RequestDetails, RequestType, ResourcingRequest, ResourcingRequestId,
};
use resourcing_core::domain::user::{Profession, ProfessionId, UserId, UserRef};
use resourcing_core::errors::DomainError;
use resourcing_core::event_log::Loggable;
use resourcing_core::flows::RequestState;
use resourcing_core::workflow::{document_entity, DocumentChange, WorkflowCommit};

use super::approval::{insert_approval, load_slots};
use super::change_log::insert_change;
use super::comment::insert_comment;
use super::event::insert_event;
use super::notification_queue::enqueue;
use super::user::load_user;
use super::{
    decode_json, encode_json, format_date, parse_date, parse_timestamp, RepositoryError,
    ResourcingRequestRepository,
};
use crate::DbPool;

pub struct SqlResourcingRequestRepository {
    pool: DbPool,
}

impl SqlResourcingRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn record_changes(&self, changes: Vec<Change>) -> Result<(), RepositoryError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in &changes {
            insert_change(&mut tx, change).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResourcingRequestRepository for SqlResourcingRequestRepository {
    async fn find_by_id(
        &self,
        id: &ResourcingRequestId,
    ) -> Result<Option<ResourcingRequest>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_request(&mut conn, id).await
    }

    async fn list(&self) -> Result<Vec<ResourcingRequest>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM resourcing_request ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            let id = ResourcingRequestId(id);
            let request = load_request(&mut conn, &id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("resourcing request `{}`", id.0)))?;
            requests.push(request);
        }
        Ok(requests)
    }

    async fn commit(&self, commit: &WorkflowCommit) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut stage = ChangeStage::default();

        let outcome = match write_commit(&mut tx, commit, &mut stage).await {
            Ok(()) => tx.commit().await.map_err(RepositoryError::from),
            Err(error) => {
                tx.rollback().await?;
                Err(error)
            }
        };

        match outcome {
            Ok(()) => self.record_changes(stage.committed()).await,
            Err(error) => {
                stage.rolled_back();
                Err(error)
            }
        }
    }

    async fn delete(&self, commit: &WorkflowCommit) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM resourcing_request WHERE id = ?")
            .bind(&commit.request.id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(format!(
                "resourcing request `{}`",
                commit.request.id.0
            )));
        }

        for event in &commit.events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn write_commit(
    conn: &mut SqliteConnection,
    commit: &WorkflowCommit,
    stage: &mut ChangeStage,
) -> Result<(), RepositoryError> {
    let request = &commit.request;
    let persisted = load_request(conn, &request.id).await?;

    match &persisted {
        Some(persisted) => {
            let decides =
                commit.approval.as_ref().is_some_and(|approval| approval.approved.is_some());
            if decides && persisted.is_approved() {
                return Err(DomainError::AlreadyApproved.into());
            }
            if persisted.version != commit.base_version() {
                return Err(DomainError::Conflict(request.id.0.clone()).into());
            }

            stage.stage(
                request.entity_ref(),
                &persisted.details,
                &request.details,
                request.updated_at,
            );
            if let Some(DocumentChange::Saved(document)) = &commit.document {
                if let Some(before) = persisted.documents.get(document.kind()) {
                    stage.stage(
                        document_entity(request, document.kind()),
                        before,
                        document,
                        request.updated_at,
                    );
                }
            }

            update_request(conn, request, commit.base_version()).await?;
        }
        None => insert_request(conn, request).await?,
    }

    match &commit.document {
        Some(DocumentChange::Saved(document)) => save_document(conn, request, document).await?,
        Some(DocumentChange::Deleted(kind)) => {
            sqlx::query(
                "DELETE FROM supporting_document WHERE resourcing_request_id = ? AND kind = ?",
            )
            .bind(&request.id.0)
            .bind(kind.as_str())
            .execute(&mut *conn)
            .await?;
        }
        None => {}
    }

    if let Some(comment) = &commit.comment {
        insert_comment(conn, comment).await?;
    }
    if let Some(approval) = &commit.approval {
        insert_approval(conn, approval).await?;
    }
    for event in &commit.events {
        insert_event(conn, event).await?;
    }

    let queued_at = Utc::now();
    for job in &commit.jobs {
        enqueue(conn, &NotificationTask::queued(job.clone(), queued_at)).await?;
    }

    Ok(())
}

async fn insert_request(
    conn: &mut SqliteConnection,
    request: &ResourcingRequest,
) -> Result<(), RepositoryError> {
    let details = &request.details;
    sqlx::query(
        "INSERT INTO resourcing_request (
            id,
            requestor_id,
            request_type,
            full_name,
            job_title,
            project_name,
            portfolio,
            profession_id,
            start_date,
            end_date,
            is_ir35,
            chief_id,
            state,
            created_at,
            updated_at,
            version
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.requestor.0)
    .bind(details.request_type.as_str())
    .bind(&details.full_name)
    .bind(&details.job_title)
    .bind(&details.project_name)
    .bind(&details.portfolio)
    .bind(&details.profession.id.0)
    .bind(format_date(details.start_date))
    .bind(format_date(details.end_date))
    .bind(details.is_ir35)
    .bind(details.chief.as_ref().map(|chief| chief.id.0.as_str()))
    .bind(request.state.as_str())
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .bind(request.version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes the row only if it is still at `base_version`; another writer that
/// got there first turns this into a conflict.
async fn update_request(
    conn: &mut SqliteConnection,
    request: &ResourcingRequest,
    base_version: i64,
) -> Result<(), RepositoryError> {
    let details = &request.details;
    let result = sqlx::query(
        "UPDATE resourcing_request SET
            request_type = ?,
            full_name = ?,
            job_title = ?,
            project_name = ?,
            portfolio = ?,
            profession_id = ?,
            start_date = ?,
            end_date = ?,
            is_ir35 = ?,
            chief_id = ?,
            state = ?,
            updated_at = ?,
            version = ?
         WHERE id = ? AND version = ?",
    )
    .bind(details.request_type.as_str())
    .bind(&details.full_name)
    .bind(&details.job_title)
    .bind(&details.project_name)
    .bind(&details.portfolio)
    .bind(&details.profession.id.0)
    .bind(format_date(details.start_date))
    .bind(format_date(details.end_date))
    .bind(details.is_ir35)
    .bind(details.chief.as_ref().map(|chief| chief.id.0.as_str()))
    .bind(request.state.as_str())
    .bind(request.updated_at.to_rfc3339())
    .bind(request.version)
    .bind(&request.id.0)
    .bind(base_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::Conflict(request.id.0.clone()).into());
    }
    Ok(())
}

async fn save_document(
    conn: &mut SqliteConnection,
    request: &ResourcingRequest,
    document: &SupportingDocument,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO supporting_document (resourcing_request_id, kind, payload_json, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(resourcing_request_id, kind) DO UPDATE SET
            payload_json = excluded.payload_json,
            updated_at = excluded.updated_at",
    )
    .bind(&request.id.0)
    .bind(document.kind().as_str())
    .bind(encode_json("payload_json", document)?)
    .bind(request.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn load_request(
    conn: &mut SqliteConnection,
    id: &ResourcingRequestId,
) -> Result<Option<ResourcingRequest>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            resourcing_request.id,
            resourcing_request.requestor_id,
            resourcing_request.request_type,
            resourcing_request.full_name,
            resourcing_request.job_title,
            resourcing_request.project_name,
            resourcing_request.portfolio,
            resourcing_request.profession_id,
            profession.name AS profession_name,
            resourcing_request.start_date,
            resourcing_request.end_date,
            resourcing_request.is_ir35,
            resourcing_request.chief_id,
            resourcing_request.state,
            resourcing_request.created_at,
            resourcing_request.updated_at,
            resourcing_request.version
         FROM resourcing_request
         JOIN profession ON profession.id = resourcing_request.profession_id
         WHERE resourcing_request.id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut request = request_from_row(&row)?;

    if let Some(chief_id) = row.try_get::<Option<String>, _>("chief_id")? {
        let chief_id = UserId(chief_id);
        let chief = load_user(conn, &chief_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("chief `{}` does not exist", chief_id.0))
        })?;
        request.details.chief = Some(UserRef { id: chief.id.clone(), display_name: chief.full_name() });
    }

    let payloads: Vec<String> = sqlx::query_scalar(
        "SELECT payload_json FROM supporting_document WHERE resourcing_request_id = ?",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;
    for payload in payloads {
        let document: SupportingDocument = decode_json("payload_json", &payload)?;
        request.documents.insert(document);
    }

    request.approvals = load_slots(conn, id).await?;
    Ok(Some(request))
}

fn request_from_row(row: &SqliteRow) -> Result<ResourcingRequest, RepositoryError> {
    let request_type_raw = row.try_get::<String, _>("request_type")?;
    let request_type = RequestType::parse(&request_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown request type `{request_type_raw}`"))
    })?;
    let state_raw = row.try_get::<String, _>("state")?;
    let state = RequestState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request state `{state_raw}`")))?;

    Ok(ResourcingRequest {
        id: ResourcingRequestId(row.try_get("id")?),
        requestor: UserId(row.try_get("requestor_id")?),
        details: RequestDetails {
            request_type,
            full_name: row.try_get("full_name")?,
            job_title: row.try_get("job_title")?,
            project_name: row.try_get("project_name")?,
            portfolio: row.try_get("portfolio")?,
            profession: Profession {
                id: ProfessionId(row.try_get("profession_id")?),
                name: row.try_get("profession_name")?,
            },
            start_date: parse_date("start_date", row.try_get("start_date")?)?,
            end_date: parse_date("end_date", row.try_get("end_date")?)?,
            is_ir35: row.try_get("is_ir35")?,
            chief: None,
        },
        state,
        approvals: Default::default(),
        documents: Default::default(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        version: row.try_get("version")?,
    })
}
