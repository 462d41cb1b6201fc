//! Text-completion provider abstraction.
//!
//! Uses blocking HTTP via `ureq`: every call blocks the calling worker, and the worker
//! pools provide all parallelism.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use threadforge_core::config::LlmConfig;

/// Errors from upstream text or image service calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("empty response from model")]
    EmptyResponse,
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completed model response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// The text content of the response.
    pub text: String,
    /// Input tokens used (from API response, if reported).
    pub input_tokens: Option<u64>,
    /// Output tokens used (from API response, if reported).
    pub output_tokens: Option<u64>,
}

/// Abstraction over text-completion services.
///
/// Implementations are shared by reference across worker threads.
pub trait LlmProvider: Send + Sync {
    /// Send one non-streaming completion request.
    fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError>;

    /// The model name (for display/logging).
    fn model_name(&self) -> &str;
}

/// Build a blocking agent with a short connect timeout and a long receive timeout.
pub(crate) fn http_agent(connect: Duration, read: Duration) -> ureq::Agent {
    ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_connect(Some(connect))
            .timeout_recv_response(Some(read))
            .timeout_recv_body(Some(read))
            .build(),
    )
}

pub(crate) fn map_ureq_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::StatusCode(status) => ProviderError::Api {
            status,
            message: format!("upstream returned HTTP {}", status),
        },
        other => ProviderError::Http(other.to_string()),
    }
}

/// Interpret an OpenAI-style chat completion envelope.
pub(crate) fn parse_chat_envelope(json: &Value) -> Result<LlmResponse, ProviderError> {
    if let Some(err) = json.get("error") {
        return Err(ProviderError::Api {
            status: 400,
            message: err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .filter(|t| !t.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)?
        .to_string();

    let input_tokens = json
        .get("usage")
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|t| t.as_u64());
    let output_tokens = json
        .get("usage")
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|t| t.as_u64());

    Ok(LlmResponse {
        text,
        input_tokens,
        output_tokens,
    })
}

// ---------------------------------------------------------------------------
// OpenAI-compatible Chat Completions API
// ---------------------------------------------------------------------------

/// OpenAI-compatible provider (works with OpenAI and compatible proxies).
#[cfg(feature = "openai")]
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    agent: ureq::Agent,
}

#[cfg(feature = "openai")]
impl OpenAiProvider {
    /// `base_url` must already end in `/v1`.
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            model,
            base_url,
            agent: http_agent(connect_timeout, read_timeout),
        }
    }

    /// Build from the `[llm]` config section. Fails when no API key is set.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
        Ok(Self::new(
            api_key,
            config.model.clone(),
            config.normalized_base(),
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
        ))
    }
}

#[cfg(feature = "openai")]
impl LlmProvider for OpenAiProvider {
    fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(map_ureq_error)?;

        let json: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_chat_envelope(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
