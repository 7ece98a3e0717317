//! Multi-platform IM gateway: platform adapters normalize chat events into a
//! canonical message model and hand them to a dispatcher backed by an LLM.

pub mod config;
pub mod dispatch;
pub mod im;
pub mod llm;
pub mod platform;
