pub mod agents;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod tasks;

use std::future::Future;
use std::sync::Arc;

use conductor_agent::assembly::assemble;
use conductor_agent::runtime::{Orchestrator, OrchestratorError};
use conductor_agent::tools::HandlerRegistry;
use conductor_core::config::{AppConfig, LoadOptions};
use conductor_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn orchestration_failure(command: &str, error: &OrchestratorError) -> Self {
        let error_class = error.error_class();
        let exit_code = match error_class {
            "configuration" => 2,
            "persistence" => 4,
            "not_found" => 7,
            "governance" => 8,
            "state" => 9,
            _ => 6,
        };
        Self::failure(command, error_class, error.to_string(), exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects and applies pending migrations, so every command sees the current schema.
pub(crate) async fn open_database(command: &str, config: &AppConfig) -> Result<DbPool, CommandResult> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| CommandResult::failure(command, "db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandResult::failure(command, "migration", error.to_string(), 5))?;
    Ok(pool)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Runs `operation` against a fully assembled orchestrator, then drains the
/// audit queue before the runtime goes away.
pub(crate) fn with_orchestrator<F, Fut>(command: &str, operation: F) -> CommandResult
where
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: Future<Output = Result<(String, Value), OrchestratorError>>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_database(command, &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let assembly = match assemble(&config, pool.clone(), HandlerRegistry::default()) {
            Ok(assembly) => assembly,
            Err(error) => {
                pool.close().await;
                return CommandResult::failure(command, "configuration", error.to_string(), 2);
            }
        };

        let outcome = operation(assembly.orchestrator.clone()).await;

        drop(assembly.orchestrator);
        let _ = assembly.audit_drain.await;
        pool.close().await;

        match outcome {
            Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
            Err(error) => CommandResult::orchestration_failure(command, &error),
        }
    })
}
