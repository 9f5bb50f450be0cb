use conductor_agent::assembly::{assemble, Assembly, AssemblyError};
use conductor_agent::tools::HandlerRegistry;
use conductor_core::config::{AppConfig, ConfigError, LoadOptions};
use conductor_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub assembly: Assembly,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("no handler registered for capabilities: {0}")]
    MissingHandlers(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

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

    let assembly = assemble(&config, db_pool.clone(), HandlerRegistry::default())?;
    if !assembly.handler_report.is_complete() {
        let missing = assembly
            .handler_report
            .missing
            .iter()
            .map(|entry| format!("{} (target `{}`)", entry.capability_code, entry.target))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            event_name = "system.bootstrap.handlers_missing",
            correlation_id = "bootstrap",
            missing = %missing,
            "capability catalog references targets without handlers"
        );
        return Err(BootstrapError::MissingHandlers(missing));
    }
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        correlation_id = "bootstrap",
        capabilities = assembly.catalog.len(),
        "orchestrator ready"
    );

    Ok(Application { config, db_pool, assembly })
}
