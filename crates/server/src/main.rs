mod bootstrap;
mod health;
mod sweeper;

use std::time::Duration;

use anyhow::Result;
use conductor_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

use crate::health::HealthState;

fn init_logging(config: &AppConfig) {
    use conductor_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the config, so load it before anything else logs.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        HealthState { db_pool: app.db_pool.clone(), audit_drops: app.assembly.audit_drops.clone() },
    )
    .await?;

    let (stop, shutdown) = watch::channel(false);
    let sweeper = sweeper::spawn(
        app.assembly.orchestrator.clone(),
        Duration::from_secs(app.config.engine.sweep_interval_secs),
        shutdown,
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        worker_id = %app.assembly.orchestrator.settings().worker_id,
        "conductor-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "conductor-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let _ = stop.send(true);
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        tracing::warn!(
            event_name = "system.server.sweep_abandoned",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight sweep did not finish within the grace period"
        );
    }

    // Dropping the orchestrator closes the audit queue; wait for it to drain.
    let crate::bootstrap::Application { db_pool, assembly, .. } = app;
    drop(assembly.orchestrator);
    if tokio::time::timeout(grace, assembly.audit_drain).await.is_err() {
        tracing::warn!(
            event_name = "system.server.audit_drain_abandoned",
            correlation_id = "shutdown",
            dropped_records = assembly.audit_drops.get(),
            "audit queue did not drain within the grace period"
        );
    }
    db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
