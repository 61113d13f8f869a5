use resourcing_core::config::{AppConfig, ConfigError, LoadOptions};
use resourcing_core::notifications::NotificationDispatcher;
use resourcing_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::notify::{transport_for, NotifyTransport, TransportError};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: NotificationDispatcher,
    pub transport: Box<dyn NotifyTransport>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification transport could not be created: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let transport = transport_for(&config.notify)?;

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let dispatcher = NotificationDispatcher::new(
        config.approval_order().clone(),
        config.notify.templates.clone(),
        config.site.base_url.clone(),
    );

    Ok(Application { config, db_pool, dispatcher, transport })
}
