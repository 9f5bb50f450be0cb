use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use conductor_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "CONDUCTOR_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "CONDUCTOR_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "CONDUCTOR_DATABASE_TIMEOUT_SECS"),
        ("llm.provider", config.llm.provider.as_str().to_string(), "CONDUCTOR_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "CONDUCTOR_LLM_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "CONDUCTOR_LLM_BASE_URL",
        ),
        ("llm.api_key", llm_api_key.to_string(), "CONDUCTOR_LLM_API_KEY"),
        (
            "llm.ollama_url",
            config.llm.ollama_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "CONDUCTOR_LLM_OLLAMA_URL",
        ),
        ("llm.ollama_model", config.llm.ollama_model.clone(), "CONDUCTOR_LLM_OLLAMA_MODEL"),
        ("llm.temperature", config.llm.temperature.to_string(), "CONDUCTOR_LLM_TEMPERATURE"),
        (
            "engine.dispatch_timeout_secs",
            config.engine.dispatch_timeout_secs.to_string(),
            "CONDUCTOR_ENGINE_DISPATCH_TIMEOUT_SECS",
        ),
        (
            "engine.claim_timeout_secs",
            config.engine.claim_timeout_secs.to_string(),
            "CONDUCTOR_ENGINE_CLAIM_TIMEOUT_SECS",
        ),
        (
            "engine.sweep_interval_secs",
            config.engine.sweep_interval_secs.to_string(),
            "CONDUCTOR_ENGINE_SWEEP_INTERVAL_SECS",
        ),
        (
            "engine.sweep_batch_size",
            config.engine.sweep_batch_size.to_string(),
            "CONDUCTOR_ENGINE_SWEEP_BATCH_SIZE",
        ),
        (
            "engine.revalidate_on_resume",
            config.engine.revalidate_on_resume.to_string(),
            "CONDUCTOR_ENGINE_REVALIDATE_ON_RESUME",
        ),
        ("audit.queue_capacity", config.audit.queue_capacity.to_string(), "CONDUCTOR_AUDIT_QUEUE_CAPACITY"),
        ("server.bind_address", config.server.bind_address.clone(), "CONDUCTOR_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "CONDUCTOR_SERVER_HEALTH_CHECK_PORT",
        ),
        ("logging.level", config.logging.level.clone(), "CONDUCTOR_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "CONDUCTOR_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        lines.push(render_line(
            key,
            &value,
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.push(format!("- capabilities = {} entry(ies)", config.capabilities.len()));
    for capability in &config.capabilities {
        let dispatch = if capability.webhook_url.is_some() { "webhook" } else { "in-process" };
        lines.push(format!(
            "  - {} -> {} [{} risk, approval: {}, {dispatch}]",
            capability.code,
            capability.target,
            capability.risk_level.as_str(),
            capability.requires_approval
        ));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("conductor.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/conductor.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
