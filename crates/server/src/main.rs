mod bootstrap;
mod health;
mod notify;
mod worker;

use std::time::Duration;

use anyhow::Result;
use resourcing_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::worker::NotificationWorker;

fn init_logging(config: &AppConfig) {
    use resourcing_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        app.transport.mode(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_pool = app.db_pool.clone();
    let worker_settings = app.config.worker.clone();
    let dispatcher = app.dispatcher;
    let transport = app.transport;
    let worker_handle = tokio::spawn(async move {
        NotificationWorker::new(worker_pool, &dispatcher, transport.as_ref(), worker_settings)
            .run(shutdown_rx)
            .await;
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "resourcing-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "resourcing-server stopping"
    );

    // The receiver may already be gone if the worker exited on its own.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "notification worker did not stop in time"
        );
    }

    app.db_pool.close().await;
    Ok(())
}
