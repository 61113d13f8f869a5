use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::domain::approval::{Approval, ApprovalId, ApprovalSlots, ApprovalType};
use resourcing_core::domain::comment::CommentId;
use resourcing_core::domain::resourcing_request::ResourcingRequestId;
use resourcing_core::domain::user::UserId;

use super::{parse_timestamp, ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                resourcing_request_id,
                approval_type,
                approved,
                user_id,
                reason_comment_id,
                created_at
             FROM approval
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(approval_from_row).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                resourcing_request_id,
                approval_type,
                approved,
                user_id,
                reason_comment_id,
                created_at
             FROM approval
             WHERE resourcing_request_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(approval_from_row).collect()
    }
}

/// Stores a new decision and re-points the slot for its type at it.
pub(crate) async fn insert_approval(
    conn: &mut SqliteConnection,
    approval: &Approval,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval (
            id,
            resourcing_request_id,
            approval_type,
            approved,
            user_id,
            reason_comment_id,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&approval.id.0)
    .bind(&approval.resourcing_request_id.0)
    .bind(approval.approval_type.as_str())
    .bind(approval.approved)
    .bind(&approval.user_id.0)
    .bind(approval.reason.as_ref().map(|reason| reason.0.as_str()))
    .bind(approval.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO approval_slot (resourcing_request_id, approval_type, approval_id)
         VALUES (?, ?, ?)
         ON CONFLICT(resourcing_request_id, approval_type) DO UPDATE SET
            approval_id = excluded.approval_id",
    )
    .bind(&approval.resourcing_request_id.0)
    .bind(approval.approval_type.as_str())
    .bind(&approval.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn load_slots(
    conn: &mut SqliteConnection,
    request_id: &ResourcingRequestId,
) -> Result<ApprovalSlots, RepositoryError> {
    let rows = sqlx::query(
        "SELECT
            approval.id,
            approval.resourcing_request_id,
            approval.approval_type,
            approval.approved,
            approval.user_id,
            approval.reason_comment_id,
            approval.created_at
         FROM approval_slot
         JOIN approval ON approval.id = approval_slot.approval_id
         WHERE approval_slot.resourcing_request_id = ?",
    )
    .bind(&request_id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut slots = ApprovalSlots::default();
    for row in rows {
        slots.set(approval_from_row(row)?);
    }
    Ok(slots)
}

fn approval_from_row(row: SqliteRow) -> Result<Approval, RepositoryError> {
    let approval_type_raw = row.try_get::<String, _>("approval_type")?;
    let approval_type = ApprovalType::parse(&approval_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval type `{approval_type_raw}`"))
    })?;

    Ok(Approval {
        id: ApprovalId(row.try_get("id")?),
        resourcing_request_id: ResourcingRequestId(row.try_get("resourcing_request_id")?),
        approval_type,
        approved: row.try_get("approved")?,
        user_id: UserId(row.try_get("user_id")?),
        reason: row.try_get::<Option<String>, _>("reason_comment_id")?.map(CommentId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
