use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::capability::{Capability, RiskLevel};
use crate::execution_engine::EngineConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub engine: EngineSettings,
    pub audit: AuditConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub capabilities: Vec<CapabilityConfig>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub ollama_url: Option<String>,
    pub ollama_model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub dispatch_timeout_secs: u64,
    pub claim_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: u32,
    pub max_output_chars: usize,
    pub max_error_chars: usize,
    pub context_limit: usize,
    pub context_max_chars: usize,
    pub revalidate_on_resume: bool,
}

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// A catalog entry declared in the config file. Webhook-backed entries are
/// dispatched by POSTing the action params to `webhook_url`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub code: String,
    pub name: Option<String>,
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl CapabilityConfig {
    pub fn to_capability(&self) -> Capability {
        let mut capability = Capability::new(
            self.code.as_str(),
            self.target.as_str(),
            self.risk_level,
            self.requires_approval,
        );
        if let Some(name) = &self.name {
            capability = capability.with_name(name.clone());
        }
        if let Some(description) = &self.description {
            capability = capability.with_description(description.clone());
        }
        if self.destructive {
            capability = capability.flagged_destructive();
        }
        capability
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAiCompatible,
    Ollama,
    Disabled,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai_compatible",
            Self::Ollama => "ollama",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub sweep_batch_size: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://conductor.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("https://api.openai.com/v1".to_string()),
                model: "gpt-4o-mini".to_string(),
                ollama_url: Some("http://localhost:11434".to_string()),
                ollama_model: "llama3.1".to_string(),
                timeout_secs: 60,
                temperature: 0.2,
            },
            engine: EngineSettings {
                dispatch_timeout_secs: 30,
                claim_timeout_secs: 300,
                sweep_interval_secs: 60,
                sweep_batch_size: 10,
                max_output_chars: 5_000,
                max_error_chars: 5_000,
                context_limit: 5,
                context_max_chars: 2_000,
                revalidate_on_resume: true,
            },
            audit: AuditConfig { queue_capacity: 1_024 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            capabilities: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            claim_timeout_seconds: i64::try_from(self.claim_timeout_secs).unwrap_or(i64::MAX),
            max_output_chars: self.max_output_chars,
            max_error_chars: self.max_error_chars,
            revalidate_on_resume: self.revalidate_on_resume,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai_compatible" | "openai" => Ok(Self::OpenAiCompatible),
            "ollama" => Ok(Self::Ollama),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai_compatible|ollama|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("conductor.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(ollama_url) = llm.ollama_url {
                self.llm.ollama_url = Some(ollama_url);
            }
            if let Some(ollama_model) = llm.ollama_model {
                self.llm.ollama_model = ollama_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(value) = engine.dispatch_timeout_secs {
                self.engine.dispatch_timeout_secs = value;
            }
            if let Some(value) = engine.claim_timeout_secs {
                self.engine.claim_timeout_secs = value;
            }
            if let Some(value) = engine.sweep_interval_secs {
                self.engine.sweep_interval_secs = value;
            }
            if let Some(value) = engine.sweep_batch_size {
                self.engine.sweep_batch_size = value;
            }
            if let Some(value) = engine.max_output_chars {
                self.engine.max_output_chars = value;
            }
            if let Some(value) = engine.max_error_chars {
                self.engine.max_error_chars = value;
            }
            if let Some(value) = engine.context_limit {
                self.engine.context_limit = value;
            }
            if let Some(value) = engine.context_max_chars {
                self.engine.context_max_chars = value;
            }
            if let Some(value) = engine.revalidate_on_resume {
                self.engine.revalidate_on_resume = value;
            }
        }

        if let Some(audit) = patch.audit {
            if let Some(queue_capacity) = audit.queue_capacity {
                self.audit.queue_capacity = queue_capacity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(capabilities) = patch.capabilities {
            self.capabilities = capabilities;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONDUCTOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONDUCTOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONDUCTOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONDUCTOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONDUCTOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_OLLAMA_URL") {
            self.llm.ollama_url = Some(value);
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_OLLAMA_MODEL") {
            self.llm.ollama_model = value;
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONDUCTOR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_LLM_TEMPERATURE") {
            self.llm.temperature = value.parse::<f32>().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "CONDUCTOR_LLM_TEMPERATURE".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = read_env("CONDUCTOR_ENGINE_DISPATCH_TIMEOUT_SECS") {
            self.engine.dispatch_timeout_secs =
                parse_u64("CONDUCTOR_ENGINE_DISPATCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_ENGINE_CLAIM_TIMEOUT_SECS") {
            self.engine.claim_timeout_secs =
                parse_u64("CONDUCTOR_ENGINE_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_ENGINE_SWEEP_INTERVAL_SECS") {
            self.engine.sweep_interval_secs =
                parse_u64("CONDUCTOR_ENGINE_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_ENGINE_SWEEP_BATCH_SIZE") {
            self.engine.sweep_batch_size = parse_u32("CONDUCTOR_ENGINE_SWEEP_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_ENGINE_REVALIDATE_ON_RESUME") {
            self.engine.revalidate_on_resume =
                parse_bool("CONDUCTOR_ENGINE_REVALIDATE_ON_RESUME", &value)?;
        }

        if let Some(value) = read_env("CONDUCTOR_AUDIT_QUEUE_CAPACITY") {
            self.audit.queue_capacity = parse_usize("CONDUCTOR_AUDIT_QUEUE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("CONDUCTOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONDUCTOR_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CONDUCTOR_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CONDUCTOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONDUCTOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONDUCTOR_LOGGING_LEVEL").or_else(|| read_env("CONDUCTOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONDUCTOR_LOGGING_FORMAT").or_else(|| read_env("CONDUCTOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(sweep_batch_size) = overrides.sweep_batch_size {
            self.engine.sweep_batch_size = sweep_batch_size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_engine(&self.engine)?;
        validate_audit(&self.audit)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_capabilities(&self.capabilities)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("conductor.toml"), PathBuf::from("config/conductor.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAiCompatible => {
            let missing_key = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai_compatible provider".to_string(),
                ));
            }
            if !is_http_url(llm.base_url.as_deref()) {
                return Err(ConfigError::Validation(
                    "llm.base_url must be an http(s) URL for the openai_compatible provider"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            if !is_http_url(llm.ollama_url.as_deref()) {
                return Err(ConfigError::Validation(
                    "llm.ollama_url must be an http(s) URL for the ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Disabled => {}
    }

    Ok(())
}

fn validate_engine(engine: &EngineSettings) -> Result<(), ConfigError> {
    if engine.dispatch_timeout_secs == 0 || engine.dispatch_timeout_secs > 3_600 {
        return Err(ConfigError::Validation(
            "engine.dispatch_timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    if engine.claim_timeout_secs <= engine.dispatch_timeout_secs {
        return Err(ConfigError::Validation(
            "engine.claim_timeout_secs must be greater than engine.dispatch_timeout_secs"
                .to_string(),
        ));
    }

    if engine.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if engine.sweep_batch_size == 0 {
        return Err(ConfigError::Validation(
            "engine.sweep_batch_size must be greater than zero".to_string(),
        ));
    }

    if engine.max_output_chars == 0 || engine.max_error_chars == 0 {
        return Err(ConfigError::Validation(
            "engine.max_output_chars and engine.max_error_chars must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_audit(audit: &AuditConfig) -> Result<(), ConfigError> {
    if audit.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "audit.queue_capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_capabilities(capabilities: &[CapabilityConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for capability in capabilities {
        if capability.code.trim().is_empty() || capability.target.trim().is_empty() {
            return Err(ConfigError::Validation(
                "capabilities entries need a non-empty code and target".to_string(),
            ));
        }
        if !seen.insert(capability.code.as_str()) {
            return Err(ConfigError::Validation(format!(
                "capability code `{}` is declared more than once",
                capability.code
            )));
        }
        if capability.webhook_url.is_some() && !is_http_url(capability.webhook_url.as_deref()) {
            return Err(ConfigError::Validation(format!(
                "capability `{}` webhook_url must start with http:// or https://",
                capability.code
            )));
        }
    }
    Ok(())
}

fn is_http_url(value: Option<&str>) -> bool {
    value
        .map(str::trim)
        .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"))
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    engine: Option<EnginePatch>,
    audit: Option<AuditPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    capabilities: Option<Vec<CapabilityConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    ollama_url: Option<String>,
    ollama_model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    dispatch_timeout_secs: Option<u64>,
    claim_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    sweep_batch_size: Option<u32>,
    max_output_chars: Option<usize>,
    max_error_chars: Option<usize>,
    context_limit: Option<usize>,
    context_max_chars: Option<usize>,
    revalidate_on_resume: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AuditPatch {
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
