use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::domain::user::UserId;
use resourcing_core::event_log::{EntityRef, Event, EventContext, EventType};

use super::{parse_timestamp, EventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEventRepository {
    pool: DbPool,
}

impl SqlEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EventRepository for SqlEventRepository {
    async fn add_event(
        &self,
        entity: &EntityRef,
        user_id: Option<UserId>,
        event_type: EventType,
        context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Result<Event, RepositoryError> {
        // Rendering fails on a bad context, before any row is written.
        let event = Event::build(entity, user_id, event_type, context, timestamp)
            .map_err(resourcing_core::errors::DomainError::from)?;

        let mut conn = self.pool.acquire().await?;
        insert_event(&mut conn, &event).await?;
        Ok(event)
    }

    async fn list_for_entity(&self, entity: &EntityRef) -> Result<Vec<Event>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                entity_kind,
                entity_id,
                event_type,
                description,
                user_id,
                timestamp
             FROM event
             WHERE entity_kind = ? AND entity_id = ?
             ORDER BY timestamp DESC, rowid DESC",
        )
        .bind(&entity.kind)
        .bind(&entity.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &Event,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO event (
            id,
            entity_kind,
            entity_id,
            event_type,
            description,
            user_id,
            timestamp
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(&event.entity.kind)
    .bind(&event.entity.id)
    .bind(event.event_type.code())
    .bind(&event.description)
    .bind(event.user_id.as_ref().map(|user_id| user_id.0.as_str()))
    .bind(event.timestamp.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn event_from_row(row: SqliteRow) -> Result<Event, RepositoryError> {
    let event_type_raw = row.try_get::<String, _>("event_type")?;
    let event_type = EventType::parse(&event_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown event type `{event_type_raw}`")))?;

    Ok(Event {
        id: row.try_get("id")?,
        entity: EntityRef::new(
            row.try_get::<String, _>("entity_kind")?,
            row.try_get::<String, _>("entity_id")?,
        ),
        event_type,
        description: row.try_get("description")?,
        user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
        timestamp: parse_timestamp("timestamp", row.try_get("timestamp")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use resourcing_core::domain::user::UserId;
    use resourcing_core::errors::DomainError;
    use resourcing_core::event_log::{context, EntityRef, EventContext, EventType};

    use super::SqlEventRepository;
    use crate::repositories::{EventRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlEventRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlEventRepository::new(pool)
    }

    #[tokio::test]
    async fn add_event_renders_and_lists_newest_first() {
        let repo = setup().await;
        let entity = EntityRef::new("resourcing_request", "RR-1");
        let created_at = Utc::now();

        repo.add_event(
            &entity,
            Some(UserId("requestor".to_string())),
            EventType::Created,
            &context([("object", "resourcing request".to_string())]),
            created_at,
        )
        .await
        .expect("created event");
        repo.add_event(
            &entity,
            Some(UserId("finance".to_string())),
            EventType::GroupApproved,
            &context([("group", "Finance".to_string())]),
            created_at + Duration::seconds(5),
        )
        .await
        .expect("approved event");

        let events = repo.list_for_entity(&entity).await.expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].description, "Finance approved the resourcing request");
        assert_eq!(events[1].description, "Created a resourcing request");
        assert_eq!(events[1].user_id, Some(UserId("requestor".to_string())));
    }

    #[tokio::test]
    async fn add_event_with_wrong_context_writes_nothing() {
        let repo = setup().await;
        let entity = EntityRef::new("resourcing_request", "RR-2");

        let error = repo
            .add_event(&entity, None, EventType::GroupApproved, &EventContext::new(), Utc::now())
            .await
            .expect_err("missing group");
        assert!(matches!(error, RepositoryError::Domain(DomainError::EventLog(_))));

        let events = repo.list_for_entity(&entity).await.expect("list");
        assert!(events.is_empty());
    }
}
