use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::domain::notification_task::{
    NotificationTask, NotificationTaskId, NotificationTaskState,
};
use resourcing_core::domain::resourcing_request::ResourcingRequestId;
use resourcing_core::notifications::NotificationJob;

use super::{
    decode_json, encode_json, parse_timestamp, parse_u32, NotificationQueueRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlNotificationQueueRepository {
    pool: DbPool,
}

impl SqlNotificationQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationQueueRepository for SqlNotificationQueueRepository {
    async fn find_by_id(
        &self,
        id: &NotificationTaskId,
    ) -> Result<Option<NotificationTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                resourcing_request_id,
                payload_json,
                state,
                attempts,
                available_at,
                last_error,
                created_at,
                updated_at
             FROM notification_task
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<NotificationTask>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                resourcing_request_id,
                payload_json,
                state,
                attempts,
                available_at,
                last_error,
                created_at,
                updated_at
             FROM notification_task
             WHERE resourcing_request_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationTask>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT
                id,
                resourcing_request_id,
                payload_json,
                state,
                attempts,
                available_at,
                last_error,
                created_at,
                updated_at
             FROM notification_task
             WHERE state IN (?, ?) AND available_at <= ?
             ORDER BY available_at ASC, created_at ASC, rowid ASC
             LIMIT ?",
        )
        .bind(NotificationTaskState::Queued.as_str())
        .bind(NotificationTaskState::RetryableFailed.as_str())
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = task_from_row(row)?;
            task.state = NotificationTaskState::Running;
            task.attempts = task.attempts.saturating_add(1);
            task.updated_at = now;

            sqlx::query(
                "UPDATE notification_task
                 SET state = ?, attempts = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(task.state.as_str())
            .bind(i64::from(task.attempts))
            .bind(now.to_rfc3339())
            .bind(&task.id.0)
            .execute(&mut *tx)
            .await?;

            claimed.push(task);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: &NotificationTaskId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.finish(id, NotificationTaskState::Sent, None, None, now).await
    }

    async fn schedule_retry(
        &self,
        id: &NotificationTaskId,
        error: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.finish(id, NotificationTaskState::RetryableFailed, Some(error), Some(available_at), now)
            .await
    }

    async fn mark_failed(
        &self,
        id: &NotificationTaskId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.finish(id, NotificationTaskState::Failed, Some(error), None, now).await
    }
}

impl SqlNotificationQueueRepository {
    async fn finish(
        &self,
        id: &NotificationTaskId,
        state: NotificationTaskState,
        error: Option<&str>,
        available_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notification_task
             SET state = ?,
                 last_error = COALESCE(?, last_error),
                 available_at = COALESCE(?, available_at),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(error)
        .bind(available_at.map(|value| value.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("notification task `{}`", id.0)));
        }
        Ok(())
    }
}

/// Queues a job on the caller's connection so it lands in the same transaction
/// as the change that produced it.
pub(crate) async fn enqueue(
    conn: &mut SqliteConnection,
    task: &NotificationTask,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO notification_task (
            id,
            resourcing_request_id,
            job_kind,
            payload_json,
            state,
            attempts,
            available_at,
            last_error,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id.0)
    .bind(&task.request_id.0)
    .bind(task.job.kind())
    .bind(encode_json("payload_json", &task.job)?)
    .bind(task.state.as_str())
    .bind(i64::from(task.attempts))
    .bind(task.available_at.to_rfc3339())
    .bind(task.last_error.as_deref())
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn task_from_row(row: SqliteRow) -> Result<NotificationTask, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = NotificationTaskState::parse(&state_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification task state `{state_raw}`"))
    })?;
    let payload_json = row.try_get::<String, _>("payload_json")?;
    let job: NotificationJob = decode_json("payload_json", &payload_json)?;

    Ok(NotificationTask {
        id: NotificationTaskId(row.try_get("id")?),
        request_id: ResourcingRequestId(row.try_get("resourcing_request_id")?),
        job,
        state,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
