//! Canonical message model shared by every platform adapter.

pub mod adapter;
pub mod element;
pub mod media;
pub mod message;
pub mod sender;
pub mod sniff;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterError, ImAdapter, ImConverter, SendReport};
pub use element::{MessageElement, StructuredElement};
pub use media::{
    HttpMediaLoader, MediaError, MediaLoader, MediaResource, MediaSource, Representation,
    ResourceKind,
};
pub use message::{ImMessage, StructuredMessage};
pub use sender::{ChatSender, ChatType};
