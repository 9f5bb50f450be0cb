//! Text-generation providers.
//!
//! Two HTTP clients (OpenAI-compatible chat completions and Ollama) behind one
//! `LlmClient` trait, plus `ProviderRouter`, which picks the client per agent
//! and falls back to the system default when the agent says `system`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use conductor_core::config::{LlmConfig, LlmProvider};
use conductor_core::domain::agent::{Agent, AgentId, AgentLlmProvider};
use conductor_core::text::truncate_chars;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a corporate assistant.";
pub const ERROR_BODY_MAX_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm configuration error: {0}")]
    Configuration(String),
    #[error("llm provider is disabled")]
    Disabled,
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

impl LlmError {
    /// Missing credentials or a disabled provider; never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Disabled)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub agent_id: AgentId,
    pub provider: AgentLlmProvider,
    pub model: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn for_agent(agent: &Agent, user_prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            agent_id: agent.id.clone(),
            provider: agent.llm_provider,
            model: agent.model_name.clone(),
            system_prompt: agent
                .system_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user_prompt: user_prompt.into(),
            temperature,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| LlmError::Configuration(format!("http client: {error}")))
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.as_u16() < StatusCode::BAD_REQUEST.as_u16() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Status { status: status.as_u16(), body: truncate_chars(&body, ERROR_BODY_MAX_CHARS) })
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    default_model: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = json!({
            "model": model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        let response = error_for_status(response).await?;

        let completion: ChatCompletion =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default())
    }
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
}

#[derive(Deserialize)]
struct OllamaGeneration {
    #[serde(default)]
    response: Option<String>,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let payload = json!({
            "model": model,
            "prompt": format!("{}\n\n{}", request.system_prompt, request.user_prompt),
            "stream": false,
            "options": { "temperature": request.temperature },
        });

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        let response = error_for_status(response).await?;

        let generation: OllamaGeneration =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        Ok(generation.response.unwrap_or_default())
    }
}

/// Routes each request to the provider its agent selected.
pub struct ProviderRouter {
    default_provider: LlmProvider,
    openai: Option<Arc<dyn LlmClient>>,
    ollama: Option<Arc<dyn LlmClient>>,
}

impl ProviderRouter {
    pub fn new(
        default_provider: LlmProvider,
        openai: Option<Arc<dyn LlmClient>>,
        ollama: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        Self { default_provider, openai, ollama }
    }

    /// Builds whichever clients the configuration has enough settings for.
    /// A missing client only fails when an agent actually selects it.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let openai = match (&config.base_url, &config.api_key) {
            (Some(base_url), Some(api_key)) if !api_key.expose_secret().trim().is_empty() => {
                let client: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::new(
                    base_url.clone(),
                    api_key.clone(),
                    config.model.clone(),
                    timeout,
                )?);
                Some(client)
            }
            _ => None,
        };

        let ollama = match &config.ollama_url {
            Some(url) => {
                let client: Arc<dyn LlmClient> =
                    Arc::new(OllamaClient::new(url.clone(), config.ollama_model.clone(), timeout)?);
                Some(client)
            }
            None => None,
        };

        Ok(Self::new(config.provider, openai, ollama))
    }

    pub fn resolve(&self, provider: AgentLlmProvider) -> Result<&Arc<dyn LlmClient>, LlmError> {
        let effective = match provider {
            AgentLlmProvider::System => self.default_provider,
            AgentLlmProvider::OpenAiCompatible => LlmProvider::OpenAiCompatible,
            AgentLlmProvider::Ollama => LlmProvider::Ollama,
            AgentLlmProvider::Disabled => LlmProvider::Disabled,
        };

        match effective {
            LlmProvider::Disabled => Err(LlmError::Disabled),
            LlmProvider::OpenAiCompatible => self.openai.as_ref().ok_or_else(|| {
                LlmError::Configuration(
                    "openai_compatible provider needs llm.base_url and llm.api_key".to_string(),
                )
            }),
            LlmProvider::Ollama => self.ollama.as_ref().ok_or_else(|| {
                LlmError::Configuration("ollama provider needs llm.ollama_url".to_string())
            }),
        }
    }
}

#[async_trait]
impl LlmClient for ProviderRouter {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.resolve(request.provider)?.generate(request).await
    }
}
