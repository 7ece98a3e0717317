pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmBackend, LlmConfig};

pub use gemini::{GeminiAdapter, GeminiConfig};
pub use openai::{OpenAiCompatAdapter, OpenAiCompatConfig};

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged text turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Backend-independent chat request. `None` parameters are left to the
/// backend's defaults and never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    /// The backend's safety or content filter ended generation.
    ContentFilter,
    Other(String),
}

/// Token usage; zeroed when the backend does not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Backend-independent chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    /// Why the backend refused the prompt or the answer, when it did.
    pub block_reason: Option<String>,
    pub usage: Usage,
}

impl ChatResponse {
    /// Whether the backend withheld the answer. Blocked responses must not
    /// be shown as an assistant reply.
    pub fn is_blocked(&self) -> bool {
        self.block_reason.is_some() || self.finish_reason == FinishReason::ContentFilter
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request never produced an HTTP response.
    #[error("{backend} request failed: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{backend} API error ({status}): {body}")]
    BackendCall {
        backend: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    /// The backend answered successfully but the body cannot be understood.
    #[error("malformed {backend} response: {reason}")]
    MalformedResponse {
        backend: &'static str,
        reason: String,
        body: String,
    },
}

impl LlmError {
    /// Raw upstream payload, when one was received.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            LlmError::Transport { .. } => None,
            LlmError::BackendCall { body, .. } | LlmError::MalformedResponse { body, .. } => {
                Some(body.as_str())
            }
        }
    }
}

/// The capability every LLM connector implements: translate the canonical
/// request to its wire shape, call the backend, translate the answer back.
#[async_trait]
pub trait LlmBackendAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Build the adapter selected in the `[llm]` config section.
pub fn build_backend(config: &LlmConfig) -> Arc<dyn LlmBackendAdapter> {
    match config.backend {
        LlmBackend::Gemini => Arc::new(GeminiAdapter::new(GeminiConfig {
            api_key: config.api_key.clone(),
            api_base: config.effective_base_url().to_string(),
            timeout: config.request_timeout(),
        })),
        LlmBackend::Openrouter | LlmBackend::Openai | LlmBackend::Ollama => {
            Arc::new(OpenAiCompatAdapter::new(OpenAiCompatConfig {
                api_key: config.api_key.clone(),
                base_url: config.effective_base_url().to_string(),
                timeout: config.request_timeout(),
            }))
        }
    }
}

/// Send a prepared request and decode a successful JSON body. Returns the
/// raw body alongside so callers can attach it to later mapping errors.
pub(crate) async fn send_json<T: DeserializeOwned>(
    backend: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<(T, String), LlmError> {
    let response = request
        .send()
        .await
        .map_err(|source| LlmError::Transport { backend, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| LlmError::Transport { backend, source })?;

    if !status.is_success() {
        return Err(LlmError::BackendCall {
            backend,
            status,
            body,
        });
    }

    debug!("{} response: {}", backend, body);

    match serde_json::from_str(&body) {
        Ok(parsed) => Ok((parsed, body)),
        Err(e) => Err(LlmError::MalformedResponse {
            backend,
            reason: e.to_string(),
            body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: LlmBackend) -> LlmConfig {
        LlmConfig {
            backend,
            model: "m".into(),
            base_url: String::new(),
            api_key: "k".into(),
            max_tokens: 16,
            temperature: None,
            top_p: None,
            stop: None,
            system_prompt: String::new(),
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn test_build_backend_by_config() {
        assert_eq!(build_backend(&config(LlmBackend::Gemini)).name(), "gemini");
        assert_eq!(
            build_backend(&config(LlmBackend::Openrouter)).name(),
            "openai-compatible"
        );
        assert_eq!(
            build_backend(&config(LlmBackend::Ollama)).name(),
            "openai-compatible"
        );
    }

    #[test]
    fn test_blocked_detection() {
        let mut response = ChatResponse {
            model: "m".into(),
            content: "hi".into(),
            finish_reason: FinishReason::Stop,
            block_reason: None,
            usage: Usage::default(),
        };
        assert!(!response.is_blocked());
        response.finish_reason = FinishReason::ContentFilter;
        assert!(response.is_blocked());
        response.finish_reason = FinishReason::Stop;
        response.block_reason = Some("SAFETY".into());
        assert!(response.is_blocked());
    }

    #[test]
    fn test_raw_body_exposed() {
        let err = LlmError::MalformedResponse {
            backend: "gemini",
            reason: "no candidates".into(),
            body: "{}".into(),
        };
        assert_eq!(err.raw_body(), Some("{}"));
        assert_eq!(err.to_string(), "malformed gemini response: no candidates");
    }
}
