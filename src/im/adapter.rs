use std::error::Error as StdError;

use async_trait::async_trait;

use super::message::ImMessage;
use super::sender::{ChatSender, ChatType};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The native event has nothing that identifies who sent it.
    #[error("native event carries no sender identity")]
    MissingSender,

    /// The recipient cannot be mapped to a platform target. No platform call
    /// was made.
    #[error("unsupported recipient addressing for {chat_type} chat: {reason}")]
    UnsupportedRecipient { chat_type: ChatType, reason: String },

    /// The platform API rejected or failed a call.
    #[error("{context}: {source}")]
    Platform {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl AdapterError {
    pub fn unsupported_recipient(recipient: &ChatSender, reason: impl Into<String>) -> Self {
        Self::UnsupportedRecipient {
            chat_type: recipient.chat_type(),
            reason: reason.into(),
        }
    }

    pub fn platform(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Platform {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Per-element outcome of [`ImAdapter::send`], by element index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: Vec<usize>,
    /// Variants the platform has no send primitive for.
    pub skipped: Vec<usize>,
    pub failed: Vec<usize>,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Outbound and lifecycle capabilities of a chat-platform connector.
///
/// Object-safe so the dispatcher can hold any connector as `&dyn ImAdapter`.
#[async_trait]
pub trait ImAdapter: Send + Sync {
    /// Short platform identifier, e.g. "telegram".
    fn name(&self) -> &str;

    /// Send every element of `message` to `recipient`, in order.
    ///
    /// Unsupported variants are skipped and a failing element does not stop
    /// the remaining ones; both are reflected in the returned report. Fails
    /// up front with [`AdapterError::UnsupportedRecipient`] when the
    /// recipient cannot be addressed on this platform.
    async fn send(
        &self,
        message: &ImMessage,
        recipient: &ChatSender,
    ) -> Result<SendReport, AdapterError>;

    /// Best-effort "typing" signal. Failures are logged, never returned.
    async fn set_composing_state(&self, chat: &ChatSender, is_composing: bool);

    /// Start receiving platform events and handing them to the dispatcher.
    /// Calling it on a running adapter is a no-op.
    async fn start(&self) -> anyhow::Result<()>;

    /// Release platform connections. A no-op when not running.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Inbound half of a connector: platform-native event to [`ImMessage`].
#[async_trait]
pub trait ImConverter: Send + Sync {
    type Event: Send + Sync;

    /// Unsupported content units are skipped rather than failing the whole
    /// conversion; only a missing sender identity is an error.
    async fn convert(&self, event: &Self::Event) -> Result<ImMessage, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_report_completeness() {
        let mut report = SendReport::default();
        report.delivered.extend([0, 2]);
        assert!(report.is_complete());
        report.skipped.push(1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_error_messages() {
        let err = AdapterError::unsupported_recipient(
            &ChatSender::group("1", "abc", "x"),
            "group id is not numeric",
        );
        assert_eq!(
            err.to_string(),
            "unsupported recipient addressing for group chat: group id is not numeric"
        );

        let err = AdapterError::platform("send photo", anyhow::anyhow!("Bad Request"));
        assert_eq!(err.to_string(), "send photo: Bad Request");
        assert!(err.source().is_some());
    }
}
