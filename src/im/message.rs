use serde::Serialize;

use super::element::{MessageElement, StructuredElement};
use super::media::MediaResource;
use super::sender::ChatSender;

/// A platform-independent chat message: who sent it and what it contains.
///
/// Element order is meaningful: it is the platform send order and the order
/// of the plain-text concatenation.
#[derive(Debug, Clone)]
pub struct ImMessage {
    sender: ChatSender,
    elements: Vec<MessageElement>,
    raw_message: Option<serde_json::Value>,
}

impl ImMessage {
    pub fn new(sender: ChatSender, elements: Vec<MessageElement>) -> Self {
        Self {
            sender,
            elements,
            raw_message: None,
        }
    }

    /// Shorthand for a single-text message.
    pub fn text(sender: ChatSender, text: impl Into<String>) -> Self {
        Self::new(sender, vec![MessageElement::text(text)])
    }

    /// Attach the origin platform's payload. It is never interpreted here.
    pub fn with_raw_message(mut self, raw: serde_json::Value) -> Self {
        self.raw_message = Some(raw);
        self
    }

    pub fn sender(&self) -> &ChatSender {
        &self.sender
    }

    pub fn elements(&self) -> &[MessageElement] {
        &self.elements
    }

    pub fn raw_message(&self) -> Option<&serde_json::Value> {
        self.raw_message.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Plain-text content. Text elements are followed by a line break,
    /// other elements contribute only their tag; the result is trimmed.
    pub fn content(&self) -> String {
        let mut content = String::new();
        for element in &self.elements {
            content.push_str(&element.to_plain());
            if matches!(element, MessageElement::Text(_)) {
                content.push('\n');
            }
        }
        content.trim().to_string()
    }

    pub fn images(&self) -> Vec<&MediaResource> {
        self.filter_media(|e| matches!(e, MessageElement::Image(_)))
    }

    pub fn voices(&self) -> Vec<&MediaResource> {
        self.filter_media(|e| matches!(e, MessageElement::Voice(_)))
    }

    pub fn videos(&self) -> Vec<&MediaResource> {
        self.filter_media(|e| matches!(e, MessageElement::Video(_)))
    }

    pub fn files(&self) -> Vec<&MediaResource> {
        self.filter_media(|e| matches!(e, MessageElement::File(_)))
    }

    fn filter_media(&self, keep: impl Fn(&MessageElement) -> bool) -> Vec<&MediaResource> {
        self.elements
            .iter()
            .filter(|e| keep(*e))
            .filter_map(MessageElement::media)
            .collect()
    }

    /// Transport-ready form. Media that has not been resolved is not loaded.
    pub fn to_structured(&self) -> StructuredMessage {
        StructuredMessage {
            sender: self.sender.clone(),
            message_elements: self
                .elements
                .iter()
                .map(MessageElement::to_structured)
                .collect(),
            plain_text: self.elements.iter().map(MessageElement::to_plain).collect(),
            raw_message: self.raw_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredMessage {
    pub sender: ChatSender,
    pub message_elements: Vec<StructuredElement>,
    pub plain_text: String,
    pub raw_message: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::media::MediaSource;
    use crate::im::testing::CountingLoader;
    use std::sync::Arc;

    fn alice() -> ChatSender {
        ChatSender::direct("42", "alice")
    }

    #[test]
    fn test_content_breaks_only_after_text() {
        let message = ImMessage::new(
            alice(),
            vec![
                MessageElement::text("a"),
                MessageElement::Image(MediaResource::from_url("https://x/a.png")),
                MessageElement::text("b"),
            ],
        );
        assert_eq!(message.content(), "a\n[Image]b");
    }

    #[test]
    fn test_content_is_trimmed() {
        let message = ImMessage::new(
            alice(),
            vec![
                MessageElement::text("  hello"),
                MessageElement::text("world  "),
            ],
        );
        assert_eq!(message.content(), "hello\nworld");
        assert_eq!(ImMessage::new(alice(), vec![]).content(), "");
    }

    #[test]
    fn test_filtered_views_keep_order() {
        let first = MediaResource::from_url("https://x/1.png");
        let second = MediaResource::from_url("https://x/2.png");
        let message = ImMessage::new(
            alice(),
            vec![
                MessageElement::Image(first),
                MessageElement::Voice(MediaResource::from_url("https://x/v.ogg")),
                MessageElement::text("caption"),
                MessageElement::Image(second),
            ],
        );

        let images: Vec<_> = message
            .images()
            .iter()
            .map(|m| m.known_remote_ref().unwrap_or_default().to_string())
            .collect();
        assert_eq!(images, vec!["https://x/1.png", "https://x/2.png"]);
        assert_eq!(message.voices().len(), 1);
        assert!(message.videos().is_empty());
        assert!(message.files().is_empty());
    }

    #[test]
    fn test_structured_message_passes_raw_through() {
        let loader = Arc::new(CountingLoader::with_body(b"GIF89a"));
        let media =
            MediaResource::with_loader(MediaSource::remote("https://x/a.gif"), loader.clone())
                .unwrap();
        let raw = serde_json::json!({ "platform": "example", "update_id": 7 });
        let message = ImMessage::new(
            alice(),
            vec![MessageElement::text("look"), MessageElement::Image(media)],
        )
        .with_raw_message(raw.clone());

        let structured = message.to_structured();
        assert_eq!(structured.plain_text, "look[Image]");
        assert_eq!(structured.message_elements.len(), 2);
        assert_eq!(structured.raw_message, Some(raw));
        assert_eq!(structured.sender, alice());
        assert_eq!(loader.total_io(), 0);

        let value = serde_json::to_value(&structured).unwrap();
        assert_eq!(value["message_elements"][1]["type"], "image");
        assert!(value["message_elements"][1].get("data").is_none());
    }
}
