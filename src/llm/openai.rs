use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    send_json, ChatMessage, ChatRequest, ChatResponse, FinishReason, LlmBackendAdapter, LlmError,
    Usage,
};

const BACKEND: &str = "openai-compatible";

/// Connection settings for any `/chat/completions` endpoint
/// (OpenRouter, OpenAI, Ollama).
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub api_key: String,
    pub base_url: String,
    /// Upper bound for one completion call.
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatAdapter {
    pub fn new(config: OpenAiCompatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_request(request: &ChatRequest) -> WireRequest<'_> {
        WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.as_deref(),
        }
    }

    fn map_response(
        request: &ChatRequest,
        response: WireResponse,
        body: String,
    ) -> Result<ChatResponse, LlmError> {
        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(LlmError::MalformedResponse {
                backend: BACKEND,
                reason: "response has no choices".to_string(),
                body,
            });
        };

        let finish_reason = match choice.finish_reason.as_deref() {
            None | Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        };
        let block_reason = match (&choice.message.refusal, &finish_reason) {
            (Some(refusal), _) => Some(refusal.clone()),
            (None, FinishReason::ContentFilter) => Some("content_filter".to_string()),
            _ => None,
        };

        Ok(ChatResponse {
            model: response.model.unwrap_or_else(|| request.model.clone()),
            content: choice.message.content.unwrap_or_default(),
            finish_reason,
            block_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmBackendAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!("Sending request to {}", url);

        let mut http = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&Self::build_request(request));
        if !self.config.api_key.is_empty() {
            http = http.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let (response, body) = send_json::<WireResponse>(BACKEND, http).await?;
        Self::map_response(request, response, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "openai/gpt-4o-mini".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: None,
            top_p: Some(0.9),
            max_tokens: Some(128),
            stop: None,
        }
    }

    fn adapter(server: &MockServer, api_key: &str) -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new(OpenAiCompatConfig {
            api_key: api_key.into(),
            base_url: server.uri(),
            timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_wire_request_omits_absent_parameters() {
        let req = request();
        let wire = serde_json::to_value(OpenAiCompatAdapter::build_request(&req)).unwrap();
        assert_eq!(
            wire,
            json!({
                "model": "openai/gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ],
                "top_p": 0.9f32,
                "max_tokens": 128
            })
        );

        let mut req = request();
        req.stop = Some(vec!["###".into()]);
        let wire = serde_json::to_value(OpenAiCompatAdapter::build_request(&req)).unwrap();
        assert_eq!(wire["stop"], json!(["###"]));
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        let req = request();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini",
                "max_tokens": 128,
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-1",
                "model": "openai/gpt-4o-mini-2024",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "Hello!" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11 }
            })))
            .mount(&server)
            .await;

        let response = adapter(&server, "secret").chat(&req).await.unwrap();
        assert_eq!(response.content, "Hello!");
        assert_eq!(response.model, "openai/gpt-4o-mini-2024");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total_tokens, 11);
    }

    #[tokio::test]
    async fn test_missing_usage_is_zeroed_and_filter_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "role": "assistant", "content": null },
                    "finish_reason": "content_filter"
                }]
            })))
            .mount(&server)
            .await;

        let response = adapter(&server, "").chat(&request()).await.unwrap();
        assert_eq!(response.usage, Usage::default());
        assert!(response.is_blocked());
        assert_eq!(response.model, "openai/gpt-4o-mini");
        assert!(response.content.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_string(r#"{"error":"rate limited"}"#),
            )
            .mount(&server)
            .await;

        let err = adapter(&server, "k").chat(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::BackendCall { .. }));
        assert_eq!(err.raw_body(), Some(r#"{"error":"rate limited"}"#));
    }

    #[tokio::test]
    async fn test_hung_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new(OpenAiCompatConfig {
            api_key: String::new(),
            base_url: server.uri(),
            timeout: Duration::from_millis(100),
        });
        let err = adapter.chat(&request()).await.unwrap_err();
        match err {
            LlmError::Transport { source, .. } => assert!(source.is_timeout()),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = adapter(&server, "k").chat(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse { .. }));
    }
}
