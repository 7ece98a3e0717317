use serde::Serialize;

use super::media::{MediaResource, StructuredMedia};
use super::sender::ChatSender;

/// One unit of message content.
///
/// The set is closed: platform content that fits none of these variants is
/// carried as [`MessageElement::Json`] (lossy but not dropped).
#[derive(Debug, Clone)]
pub enum MessageElement {
    Text(String),
    Image(MediaResource),
    Voice(MediaResource),
    Video(MediaResource),
    File(MediaResource),
    Mention(ChatSender),
    Reply { message_id: String },
    /// Platform face, emoji or sticker identifier.
    Face { face_id: String },
    /// Opaque structured payload (cards, locations, polls...).
    Json(String),
}

impl MessageElement {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn reply(message_id: impl Into<String>) -> Self {
        Self::Reply {
            message_id: message_id.into(),
        }
    }

    pub fn face(face_id: impl Into<String>) -> Self {
        Self::Face {
            face_id: face_id.into(),
        }
    }

    /// The variant tag used in the structured form.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageElement::Text(_) => "text",
            MessageElement::Image(_) => "image",
            MessageElement::Voice(_) => "voice",
            MessageElement::Video(_) => "video",
            MessageElement::File(_) => "file",
            MessageElement::Mention(_) => "mention",
            MessageElement::Reply { .. } => "reply",
            MessageElement::Face { .. } => "face",
            MessageElement::Json(_) => "json",
        }
    }

    pub fn media(&self) -> Option<&MediaResource> {
        match self {
            MessageElement::Image(media)
            | MessageElement::Voice(media)
            | MessageElement::Video(media)
            | MessageElement::File(media) => Some(media),
            _ => None,
        }
    }

    /// Plain-text projection, built from identifiers only.
    pub fn to_plain(&self) -> String {
        match self {
            MessageElement::Text(text) => text.clone(),
            MessageElement::Image(_) => "[Image]".to_string(),
            MessageElement::Voice(_) => "[Voice]".to_string(),
            MessageElement::Video(_) => "[Video]".to_string(),
            MessageElement::File(media) => {
                let name = media
                    .known_local_path()
                    .map(|p| p.display().to_string())
                    .or_else(|| media.known_remote_ref().map(str::to_string))
                    .unwrap_or_else(|| "unnamed".to_string());
                format!("[File:{}]", name)
            }
            MessageElement::Mention(target) => {
                if target.display_name().is_empty() {
                    format!("@{}", target.user_id())
                } else {
                    format!("@{}", target.display_name())
                }
            }
            MessageElement::Reply { message_id } => format!("[Reply:{}]", message_id),
            MessageElement::Face { face_id } => format!("[Face:{}]", face_id),
            MessageElement::Json(_) => "[JSON Message]".to_string(),
        }
    }

    /// Structured projection of the currently known fields. Performs no I/O.
    pub fn to_structured(&self) -> StructuredElement {
        match self {
            MessageElement::Text(text) => StructuredElement::Text { text: text.clone() },
            MessageElement::Image(media) => StructuredElement::Image(media.to_structured()),
            MessageElement::Voice(media) => StructuredElement::Voice(media.to_structured()),
            MessageElement::Video(media) => StructuredElement::Video(media.to_structured()),
            MessageElement::File(media) => StructuredElement::File(media.to_structured()),
            MessageElement::Mention(target) => StructuredElement::Mention {
                data: MentionData {
                    target: target.clone(),
                },
            },
            MessageElement::Reply { message_id } => StructuredElement::Reply {
                data: IdData {
                    id: message_id.clone(),
                },
            },
            MessageElement::Face { face_id } => StructuredElement::Face {
                data: IdData {
                    id: face_id.clone(),
                },
            },
            MessageElement::Json(data) => StructuredElement::Json {
                data: JsonData { data: data.clone() },
            },
        }
    }
}

/// Transport-ready form of a [`MessageElement`], tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredElement {
    Text { text: String },
    Image(StructuredMedia),
    Voice(StructuredMedia),
    Video(StructuredMedia),
    File(StructuredMedia),
    Mention { data: MentionData },
    Reply { data: IdData },
    Face { data: IdData },
    Json { data: JsonData },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MentionData {
    pub target: ChatSender,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdData {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonData {
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::media::MediaSource;
    use crate::im::testing::CountingLoader;
    use base64::Engine;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_plain_projections() {
        assert_eq!(MessageElement::text("hi").to_plain(), "hi");
        assert_eq!(
            MessageElement::Image(MediaResource::from_url("https://x/y.png")).to_plain(),
            "[Image]"
        );
        assert_eq!(
            MessageElement::Voice(MediaResource::from_url("https://x/y.ogg")).to_plain(),
            "[Voice]"
        );
        assert_eq!(
            MessageElement::File(MediaResource::from_url("https://x/report.pdf")).to_plain(),
            "[File:https://x/report.pdf]"
        );
        assert_eq!(
            MessageElement::File(MediaResource::from_bytes(&b"x"[..], "bin")).to_plain(),
            "[File:unnamed]"
        );
        assert_eq!(
            MessageElement::Mention(ChatSender::direct("42", "alice")).to_plain(),
            "@alice"
        );
        assert_eq!(
            MessageElement::Mention(ChatSender::direct("42", "")).to_plain(),
            "@42"
        );
        assert_eq!(MessageElement::reply("9").to_plain(), "[Reply:9]");
        assert_eq!(MessageElement::face("smile").to_plain(), "[Face:smile]");
        assert_eq!(
            MessageElement::Json("{}".into()).to_plain(),
            "[JSON Message]"
        );
    }

    #[test]
    fn test_structured_tags() {
        let value = serde_json::to_value(MessageElement::text("hi").to_structured()).unwrap();
        assert_eq!(value, json!({ "type": "text", "text": "hi" }));

        let value = serde_json::to_value(MessageElement::reply("9").to_structured()).unwrap();
        assert_eq!(value, json!({ "type": "reply", "data": { "id": "9" } }));

        let value = serde_json::to_value(MessageElement::face("1").to_structured()).unwrap();
        assert_eq!(value, json!({ "type": "face", "data": { "id": "1" } }));

        let value =
            serde_json::to_value(MessageElement::Json("{\"a\":1}".into()).to_structured())
                .unwrap();
        assert_eq!(value, json!({ "type": "json", "data": { "data": "{\"a\":1}" } }));

        let value = serde_json::to_value(
            MessageElement::Mention(ChatSender::direct("42", "alice")).to_structured(),
        )
        .unwrap();
        assert_eq!(value["type"], "mention");
        assert_eq!(value["data"]["target"]["user_id"], "42");
    }

    #[test]
    fn test_unresolved_media_structured_without_io() {
        let loader = Arc::new(CountingLoader::with_body(b"\x89PNG\r\n\x1a\n"));
        let media =
            MediaResource::with_loader(MediaSource::remote("https://x/cat"), loader.clone())
                .unwrap();

        for element in [
            MessageElement::Image(media.clone()),
            MessageElement::Voice(media.clone()),
            MessageElement::Video(media.clone()),
            MessageElement::File(media),
        ] {
            let value = serde_json::to_value(element.to_structured()).unwrap();
            assert_eq!(value["type"], element.tag());
            assert_eq!(value["url"], "https://x/cat");
            assert!(value["path"].is_null());
            assert!(value.get("data").is_none());
            assert!(value["format"].is_null());
        }
        assert_eq!(loader.total_io(), 0);
    }

    #[test]
    fn test_image_bytes_survive_structured_form() {
        let original: Vec<u8> = (0u8..=255).collect();
        let element = MessageElement::Image(MediaResource::from_bytes(original.clone(), "png"));

        let value = serde_json::to_value(element.to_structured()).unwrap();
        assert_eq!(value["format"], "png");
        let encoded = value["data"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, original);
    }
}
