use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, InputFile};
use tracing::debug;

use crate::im::{HttpMediaLoader, MediaLoader};

const FILE_REF_PREFIX: &str = "telegram-file:";

/// Token-free reference to a file stored on Telegram's servers.
pub fn file_ref(file_id: &FileId) -> String {
    format!("{}{}", FILE_REF_PREFIX, file_id.0)
}

/// The file id behind a [`file_ref`], or `None` for any other reference.
pub fn parse_file_ref(reference: &str) -> Option<FileId> {
    reference
        .strip_prefix(FILE_REF_PREFIX)
        .filter(|id| !id.is_empty())
        .map(|id| FileId(id.to_string()))
}

/// Telegram send primitive used for a media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Voice,
    Video,
    Document,
}

impl MediaKind {
    /// Chat action shown while the upload is in progress.
    pub fn upload_action(self) -> ChatAction {
        match self {
            MediaKind::Photo => ChatAction::UploadPhoto,
            MediaKind::Voice => ChatAction::UploadVoice,
            MediaKind::Video => ChatAction::UploadVideo,
            MediaKind::Document => ChatAction::UploadDocument,
        }
    }
}

/// The Bot API calls the adapter relies on. Implemented for
/// [`teloxide::Bot`]; tests substitute a recording fake.
#[async_trait]
pub trait TelegramApi: Clone + Send + Sync + 'static {
    /// Loader that resolves [`file_ref`] references, and plain URLs and
    /// paths like the default loader.
    fn media_loader(&self) -> Arc<dyn MediaLoader>;

    async fn chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    async fn post_text(&self, chat_id: ChatId, text: &str) -> Result<()>;

    async fn post_media(&self, chat_id: ChatId, kind: MediaKind, file: InputFile) -> Result<()>;

    async fn post_sticker(&self, chat_id: ChatId, sticker_id: &str) -> Result<()>;

    /// Client used for long polling; `None` for transports that cannot poll.
    fn polling_client(&self) -> Option<Bot>;
}

#[async_trait]
impl TelegramApi for Bot {
    fn media_loader(&self) -> Arc<dyn MediaLoader> {
        Arc::new(TelegramFileLoader::new(self.clone()))
    }

    async fn chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.send_chat_action(chat_id, action).await?;
        Ok(())
    }

    async fn post_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await?;
        Ok(())
    }

    async fn post_media(&self, chat_id: ChatId, kind: MediaKind, file: InputFile) -> Result<()> {
        match kind {
            MediaKind::Photo => {
                self.send_photo(chat_id, file).await?;
            }
            MediaKind::Voice => {
                self.send_voice(chat_id, file).await?;
            }
            MediaKind::Video => {
                self.send_video(chat_id, file).await?;
            }
            MediaKind::Document => {
                self.send_document(chat_id, file).await?;
            }
        }
        Ok(())
    }

    async fn post_sticker(&self, chat_id: ChatId, sticker_id: &str) -> Result<()> {
        self.send_sticker(chat_id, InputFile::file_id(FileId(sticker_id.to_string())))
            .await?;
        Ok(())
    }

    fn polling_client(&self) -> Option<Bot> {
        Some(self.clone())
    }
}

/// Downloads Telegram files through the bot, so the token never ends up in a
/// media reference. Everything else goes to [`HttpMediaLoader`].
pub struct TelegramFileLoader {
    bot: Bot,
    fallback: HttpMediaLoader,
}

impl TelegramFileLoader {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            fallback: HttpMediaLoader::new(),
        }
    }
}

#[async_trait]
impl MediaLoader for TelegramFileLoader {
    async fn fetch_remote(&self, url: &str) -> std::io::Result<Bytes> {
        let Some(file_id) = parse_file_ref(url) else {
            return self.fallback.fetch_remote(url).await;
        };

        debug!("Downloading Telegram file {}", file_id.0);
        let file = self
            .bot
            .get_file(file_id)
            .await
            .map_err(std::io::Error::other)?;
        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(std::io::Error::other)?;
        Ok(Bytes::from(data))
    }

    async fn read_local(&self, path: &Path) -> std::io::Result<Bytes> {
        self.fallback.read_local(path).await
    }

    async fn write_temp(&self, data: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf> {
        self.fallback.write_temp(data, extension).await
    }
}
