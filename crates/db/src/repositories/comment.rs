use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::domain::comment::{Comment, CommentId};
use resourcing_core::domain::resourcing_request::ResourcingRequestId;
use resourcing_core::domain::user::UserId;

use super::{parse_timestamp, CommentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCommentRepository {
    pool: DbPool,
}

impl SqlCommentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CommentRepository for SqlCommentRepository {
    async fn find_by_id(&self, id: &CommentId) -> Result<Option<Comment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, resourcing_request_id, user_id, text, created_at
             FROM comment
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(comment_from_row).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &ResourcingRequestId,
    ) -> Result<Vec<Comment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, resourcing_request_id, user_id, text, created_at
             FROM comment
             WHERE resourcing_request_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(comment_from_row).collect()
    }
}

pub(crate) async fn insert_comment(
    conn: &mut SqliteConnection,
    comment: &Comment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO comment (id, resourcing_request_id, user_id, text, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&comment.id.0)
    .bind(&comment.resourcing_request_id.0)
    .bind(&comment.user_id.0)
    .bind(&comment.text)
    .bind(comment.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn comment_from_row(row: SqliteRow) -> Result<Comment, RepositoryError> {
    Ok(Comment {
        id: CommentId(row.try_get("id")?),
        resourcing_request_id: ResourcingRequestId(row.try_get("resourcing_request_id")?),
        user_id: UserId(row.try_get("user_id")?),
        text: row.try_get("text")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
