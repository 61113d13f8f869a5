use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use resourcing_db::{ping, DbPool};
use serde::Serialize;
use sqlx::Row;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    transport_mode: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub notifications: NotificationBacklog,
    pub checked_at: String,
}

/// Outbox task counts keyed by state. Failed tasks are reported but do not
/// make the service unhealthy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NotificationBacklog {
    pub transport_mode: &'static str,
    pub tasks: BTreeMap<String, i64>,
}

pub fn router(db_pool: DbPool, transport_mode: &'static str) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, transport_mode })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    transport_mode: &'static str,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, transport_mode)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let notifications = NotificationBacklog {
        transport_mode: state.transport_mode,
        tasks: if ready { task_counts(&state.db_pool).await } else { BTreeMap::new() },
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "resourcing-server runtime initialized".to_string(),
        },
        database,
        notifications,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn task_counts(pool: &DbPool) -> BTreeMap<String, i64> {
    let rows = match sqlx::query(
        "SELECT state, COUNT(1) AS task_count FROM notification_task GROUP BY state",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(error) => {
            error!(
                event_name = "system.health.backlog_error",
                error = %error,
                "could not count notification tasks"
            );
            return BTreeMap::new();
        }
    };

    rows.iter()
        .filter_map(|row| {
            let state: String = row.try_get("state").ok()?;
            let count: i64 = row.try_get("task_count").ok()?;
            Some((state, count))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use chrono::Utc;
    use resourcing_core::domain::notification_task::NotificationTask;
    use resourcing_core::domain::resourcing_request::ResourcingRequestId;
    use resourcing_core::notifications::NotificationJob;
    use resourcing_db::{connect_with_settings, migrations};

    use crate::health::{health, router, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let task = NotificationTask::queued(
            NotificationJob::AmendmentsReviewed {
                request_id: ResourcingRequestId("request-1".to_string()),
            },
            Utc::now(),
        );
        sqlx::query(
            "INSERT INTO notification_task (id, resourcing_request_id, job_kind, payload_json, state, attempts, available_at, created_at, updated_at)
             VALUES (?, 'request-1', 'amendments_reviewed', '{}', 'queued', 0, ?, ?, ?)",
        )
        .bind(&task.id.0)
        .bind(task.available_at.to_rfc3339())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&pool)
        .await
        .expect("insert task");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), transport_mode: "log_only" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.notifications.transport_mode, "log_only");
        assert_eq!(payload.notifications.tasks.get("queued"), Some(&1));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, transport_mode: "log_only" })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
        assert!(payload.notifications.tasks.is_empty());
    }

    #[tokio::test]
    async fn router_serves_health_as_json() {
        use axum::body::{to_bytes, Body};
        use axum::http::Request;
        use tower::ServiceExt;

        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let response = router(pool.clone(), "live")
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["notifications"]["transport_mode"], "live");

        pool.close().await;
    }
}
