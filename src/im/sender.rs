use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Whether a conversation is one-to-one or happens in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    DirectChat,
    GroupChat,
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatType::DirectChat => write!(f, "direct"),
            ChatType::GroupChat => write!(f, "group"),
        }
    }
}

/// Identity of a conversation participant, used both as the origin of an
/// inbound message and as the target of a reply.
///
/// Equality and hashing only consider `(chat_type, user_id, group_id)`;
/// display name and raw metadata are informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ChatSenderRepr")]
pub struct ChatSender {
    chat_type: ChatType,
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_metadata: Option<serde_json::Value>,
}

const BOT_USER_ID: &str = "bot";

impl ChatSender {
    /// A participant in a one-to-one chat.
    pub fn direct(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            chat_type: ChatType::DirectChat,
            user_id: user_id.into(),
            group_id: None,
            display_name: display_name.into(),
            raw_metadata: None,
        }
    }

    /// A participant speaking inside a group.
    pub fn group(
        user_id: impl Into<String>,
        group_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            chat_type: ChatType::GroupChat,
            user_id: user_id.into(),
            group_id: Some(group_id.into()),
            display_name: display_name.into(),
            raw_metadata: None,
        }
    }

    /// The gateway's own identity, e.g. for synthetic self-mentions.
    pub fn bot() -> Self {
        Self::direct(BOT_USER_ID, "bot")
    }

    /// Attach adapter-owned metadata (origin message id, sequence numbers...).
    pub fn with_raw_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.raw_metadata = Some(metadata);
        self
    }

    pub fn chat_type(&self) -> ChatType {
        self.chat_type
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Present only for group chats.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn raw_metadata(&self) -> Option<&serde_json::Value> {
        self.raw_metadata.as_ref()
    }

    pub fn is_bot(&self) -> bool {
        self.chat_type == ChatType::DirectChat && self.user_id == BOT_USER_ID
    }

    /// The identifier a reply should be addressed to: the group for group
    /// chats, the user otherwise.
    pub fn reply_target(&self) -> &str {
        match self.chat_type {
            ChatType::DirectChat => &self.user_id,
            ChatType::GroupChat => self.group_id.as_deref().unwrap_or(&self.user_id),
        }
    }
}

impl PartialEq for ChatSender {
    fn eq(&self, other: &Self) -> bool {
        self.chat_type == other.chat_type
            && self.user_id == other.user_id
            && self.group_id == other.group_id
    }
}

impl Eq for ChatSender {}

impl Hash for ChatSender {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chat_type.hash(state);
        self.user_id.hash(state);
        self.group_id.hash(state);
    }
}

impl fmt::Display for ChatSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group_id {
            Some(group_id) => write!(f, "{}@{} ({})", self.user_id, group_id, self.display_name),
            None => write!(f, "{} ({})", self.user_id, self.display_name),
        }
    }
}

#[derive(Deserialize)]
struct ChatSenderRepr {
    chat_type: ChatType,
    user_id: String,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    raw_metadata: Option<serde_json::Value>,
}

impl TryFrom<ChatSenderRepr> for ChatSender {
    type Error = String;

    fn try_from(repr: ChatSenderRepr) -> Result<Self, Self::Error> {
        match (repr.chat_type, &repr.group_id) {
            (ChatType::DirectChat, Some(_)) => {
                return Err("direct chat sender must not carry a group_id".to_string())
            }
            (ChatType::GroupChat, None) => {
                return Err("group chat sender requires a group_id".to_string())
            }
            _ => {}
        }
        Ok(Self {
            chat_type: repr.chat_type,
            user_id: repr.user_id,
            group_id: repr.group_id,
            display_name: repr.display_name,
            raw_metadata: repr.raw_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_ignores_display_name_and_metadata() {
        let a = ChatSender::direct("42", "alice");
        let b = ChatSender::direct("42", "Alice Liddell")
            .with_raw_metadata(serde_json::json!({ "message_id": 7 }));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_group_and_direct_are_distinct() {
        let direct = ChatSender::direct("42", "alice");
        let group = ChatSender::group("42", "-100", "alice");
        assert_ne!(direct, group);
        assert_eq!(group.group_id(), Some("-100"));
        assert_eq!(direct.group_id(), None);
    }

    #[test]
    fn test_reply_target() {
        assert_eq!(ChatSender::direct("42", "a").reply_target(), "42");
        assert_eq!(ChatSender::group("42", "-100", "a").reply_target(), "-100");
    }

    #[test]
    fn test_deserialize_validates_addressing() {
        let ok: ChatSender = serde_json::from_value(serde_json::json!({
            "chat_type": "group_chat",
            "user_id": "1",
            "group_id": "2",
            "display_name": "x"
        }))
        .unwrap();
        assert_eq!(ok.chat_type(), ChatType::GroupChat);

        let missing_group = serde_json::from_value::<ChatSender>(serde_json::json!({
            "chat_type": "group_chat",
            "user_id": "1"
        }));
        assert!(missing_group.is_err());

        let stray_group = serde_json::from_value::<ChatSender>(serde_json::json!({
            "chat_type": "direct_chat",
            "user_id": "1",
            "group_id": "2"
        }));
        assert!(stray_group.is_err());
    }

    #[test]
    fn test_bot_sender() {
        assert!(ChatSender::bot().is_bot());
        assert!(!ChatSender::direct("1", "bot").is_bot());
    }
}
