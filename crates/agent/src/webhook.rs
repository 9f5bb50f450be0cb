//! HTTP webhook capability handler.
//!
//! Capabilities declared in configuration with a `webhook_url` dispatch here.
//! The handler posts the invocation context and params as JSON and treats any
//! HTTP status of 400 or above as a handler failure.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use conductor_core::text::truncate_chars;

use crate::tools::{CapabilityHandler, HandlerError, InvocationContext};

pub const IMPERSONATION_HEADER: &str = "x-conductor-impersonate";
const ERROR_BODY_MAX_CHARS: usize = 300;

pub struct WebhookHandler {
    http: reqwest::Client,
    url: String,
}

impl WebhookHandler {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HandlerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| HandlerError::Transport(format!("http client: {error}")))?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl CapabilityHandler for WebhookHandler {
    async fn invoke(&self, context: &InvocationContext, params: &Value) -> Result<Value, HandlerError> {
        let response = self
            .http
            .post(&self.url)
            .header(IMPERSONATION_HEADER, &context.impersonation_identity)
            .json(&json!({ "context": context, "params": params }))
            .send()
            .await
            .map_err(|error| HandlerError::Transport(error.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| HandlerError::Transport(error.to_string()))?;
        if status.as_u16() >= 400 {
            return Err(HandlerError::Rejected(format!(
                "webhook returned {}: {}",
                status.as_u16(),
                truncate_chars(&body, ERROR_BODY_MAX_CHARS)
            )));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
