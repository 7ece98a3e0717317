use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::LlmConfig;
use crate::im::{ChatSender, ImAdapter, ImMessage};
use crate::llm::{ChatMessage, ChatRequest, LlmBackendAdapter};

/// Sent in place of a reply when processing fails. Details stay in the log.
const FAILURE_NOTICE: &str = "Sorry, something went wrong while processing your message.";

/// Application logic behind the adapters: receives every converted inbound
/// message together with the adapter it came from and returns the replies.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, origin: &dyn ImAdapter, message: ImMessage) -> Result<Vec<ImMessage>>;
}

/// Run one inbound message through the dispatcher and send whatever comes
/// back to the original sender.
pub async fn dispatch_and_reply(
    dispatcher: &dyn Dispatcher,
    origin: &dyn ImAdapter,
    message: ImMessage,
) {
    let recipient = message.sender().clone();
    origin.set_composing_state(&recipient, true).await;

    let replies = match dispatcher.dispatch(origin, message).await {
        Ok(replies) => replies,
        Err(e) => {
            error!("Error processing message: {:#}", e);
            vec![ImMessage::text(ChatSender::bot(), FAILURE_NOTICE)]
        }
    };

    origin.set_composing_state(&recipient, false).await;

    for reply in replies {
        match origin.send(&reply, &recipient).await {
            Ok(report) if !report.is_complete() => warn!(
                "Partial delivery via {} to {}: failed {:?}, skipped {:?}",
                origin.name(),
                recipient,
                report.failed,
                report.skipped
            ),
            Ok(_) => {}
            Err(e) => error!("Failed to reply via {}: {}", origin.name(), e),
        }
    }
}

/// Stateless workflow: every message becomes a single-turn LLM request and
/// the assistant text is sent back.
pub struct LlmReplyDispatcher {
    backend: Arc<dyn LlmBackendAdapter>,
    config: LlmConfig,
}

impl LlmReplyDispatcher {
    pub fn new(backend: Arc<dyn LlmBackendAdapter>, config: LlmConfig) -> Self {
        Self { backend, config }
    }

    fn build_request(&self, content: String) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !self.config.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(content));

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: Some(self.config.max_tokens),
            stop: self.config.stop.clone(),
        }
    }
}

#[async_trait]
impl Dispatcher for LlmReplyDispatcher {
    async fn dispatch(&self, origin: &dyn ImAdapter, message: ImMessage) -> Result<Vec<ImMessage>> {
        let content = message.content();
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let request = self.build_request(content);
        let response = self.backend.chat(&request).await?;

        info!(
            "{} via {} answered with {} tokens ({:?})",
            response.model,
            origin.name(),
            response.usage.total_tokens,
            response.finish_reason
        );

        let text = if response.is_blocked() {
            let reason = response.block_reason.as_deref().unwrap_or("content filter");
            warn!("{} withheld the answer: {}", self.backend.name(), reason);
            format!("[Response blocked by {}: {}]", self.backend.name(), reason)
        } else if response.content.trim().is_empty() {
            warn!("{} returned an empty answer", self.backend.name());
            format!("[Empty response from {}]", self.backend.name())
        } else {
            response.content
        };

        Ok(vec![ImMessage::text(ChatSender::bot(), text)])
    }
}
