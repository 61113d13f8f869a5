use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::change_log::{merge_changes, Change, ChangeSet};
use resourcing_core::event_log::EntityRef;

use super::{decode_json, encode_json, parse_timestamp, ChangeLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChangeLogRepository {
    pool: DbPool,
}

impl SqlChangeLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChangeLogRepository for SqlChangeLogRepository {
    async fn list_for_entity(&self, entity: &EntityRef) -> Result<Vec<Change>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, entity_kind, entity_id, changes_json, timestamp
             FROM change_record
             WHERE entity_kind = ? AND entity_id = ?
             ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(&entity.kind)
        .bind(&entity.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(change_from_row).collect()
    }

    async fn changes_since_creation(
        &self,
        entity: &EntityRef,
    ) -> Result<ChangeSet, RepositoryError> {
        let changes = self.list_for_entity(entity).await?;
        Ok(merge_changes(&changes))
    }
}

pub(crate) async fn insert_change(
    conn: &mut SqliteConnection,
    change: &Change,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO change_record (id, entity_kind, entity_id, changes_json, timestamp)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&change.id)
    .bind(&change.entity.kind)
    .bind(&change.entity.id)
    .bind(encode_json("changes_json", &change.changes)?)
    .bind(change.timestamp.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn change_from_row(row: SqliteRow) -> Result<Change, RepositoryError> {
    let changes_json = row.try_get::<String, _>("changes_json")?;

    Ok(Change {
        id: row.try_get("id")?,
        entity: EntityRef::new(
            row.try_get::<String, _>("entity_kind")?,
            row.try_get::<String, _>("entity_id")?,
        ),
        changes: decode_json("changes_json", &changes_json)?,
        timestamp: parse_timestamp("timestamp", row.try_get("timestamp")?)?,
    })
}
