use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Gemini,
    Openrouter,
    Openai,
    Ollama,
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmBackend::Gemini => write!(f, "gemini"),
            LlmBackend::Openrouter => write!(f, "openrouter"),
            LlmBackend::Openai => write!(f, "openai"),
            LlmBackend::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Per-request limit for backend calls; a hung backend fails the
    /// message instead of stalling it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured backend.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.backend {
            LlmBackend::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmBackend::Openrouter => "https://openrouter.ai/api/v1",
            LlmBackend::Openai => "https://api.openai.com/v1",
            LlmBackend::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Users allowed to talk to the bot. Empty accepts everyone.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    /// Pause before each non-first text element, per character.
    #[serde(default)]
    pub typing_delay_ms_per_char: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: Option<TelegramConfig>,
    pub llm: LlmConfig,
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_system_prompt() -> String {
    "You are a helpful assistant chatting through an instant-messaging platform. \
     Keep replies concise."
        .to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.telegram.is_none() {
            anyhow::bail!("No IM adapter configured: add a [telegram] section");
        }
        if config.llm.api_key.is_empty() && config.llm.backend != LlmBackend::Ollama {
            anyhow::bail!("[llm] api_key is required for the {} backend", config.llm.backend);
        }

        Ok(config)
    }
}
