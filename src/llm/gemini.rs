use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    send_json, ChatRequest, ChatResponse, FinishReason, LlmBackendAdapter, LlmError, Role, Usage,
};

const BACKEND: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    /// Upper bound for one generateContent call.
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout: super::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

fn text_content(role: &str, text: &str) -> Content {
    Content {
        role: Some(role.to_string()),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

/// Gemini `generateContent` adapter.
pub struct GeminiAdapter {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_request(request: &ChatRequest) -> GenerateContentRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(Part {
                    text: Some(message.content.clone()),
                }),
                Role::User => contents.push(text_content("user", &message.content)),
                Role::Assistant => contents.push(text_content("model", &message.content)),
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                max_output_tokens: request.max_tokens,
                stop_sequences: request.stop.clone(),
            },
        }
    }

    fn map_response(
        request: &ChatRequest,
        response: GenerateContentResponse,
        body: String,
    ) -> Result<ChatResponse, LlmError> {
        let usage = response
            .usage_metadata
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();
        let model = response
            .model_version
            .unwrap_or_else(|| request.model.clone());

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            warn!("Gemini blocked the prompt: {}", reason);
            return Ok(ChatResponse {
                model,
                content: String::new(),
                finish_reason: FinishReason::ContentFilter,
                block_reason: Some(reason),
                usage,
            });
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return Err(LlmError::MalformedResponse {
                backend: BACKEND,
                reason: "response has no candidates".to_string(),
                body,
            });
        };

        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let (finish_reason, block_reason) = match candidate.finish_reason.as_deref() {
            None | Some("STOP") => (FinishReason::Stop, None),
            Some("MAX_TOKENS") => (FinishReason::Length, None),
            Some(
                reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"),
            ) => (FinishReason::ContentFilter, Some(reason.to_string())),
            Some(other) => (FinishReason::Other(other.to_string()), None),
        };

        Ok(ChatResponse {
            model,
            content,
            finish_reason,
            block_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmBackendAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base, request.model
        );
        debug!("Sending request to Gemini: {}", url);

        let wire = Self::build_request(request);
        let http = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(self.config.timeout)
            .json(&wire);

        let (response, body) = send_json::<GenerateContentResponse>(BACKEND, http).await?;
        Self::map_response(request, response, body)
    }
}
