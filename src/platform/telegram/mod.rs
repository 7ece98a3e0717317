mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, InputFile, MessageKind, User};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::dispatch::{self, Dispatcher};
use crate::im::{
    AdapterError, ChatSender, ChatType, ImAdapter, ImConverter, ImMessage, MediaLoader,
    MediaResource, MediaSource, MessageElement, SendReport,
};

pub use api::{file_ref, parse_file_ref, MediaKind, TelegramApi, TelegramFileLoader};

/// Stay under Telegram's 4096 char limit
const TELEGRAM_CHUNK_LEN: usize = 4000;

/// Upper bound for the simulated typing pause before a text element.
const MAX_TYPING_DELAY: Duration = Duration::from_secs(5);

/// How long `stop` waits for in-flight handlers before cancelling them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const WELCOME_TEXT: &str = "Welcome! I am ready to receive your messages.";

/// `/start`, `/start@SomeBot` and `/start <payload>` all count.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    command == "/start" || command.starts_with("/start@")
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Username, then "first last", then the numeric id.
fn display_name(user: &User) -> String {
    if let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) {
        return username.to_string();
    }
    let full_name = format!(
        "{} {}",
        user.first_name,
        user.last_name.as_deref().unwrap_or_default()
    );
    let full_name = full_name.trim();
    if full_name.is_empty() {
        user.id.0.to_string()
    } else {
        full_name.to_string()
    }
}

fn sender_from_message(msg: &Message) -> Result<ChatSender, AdapterError> {
    let (user_id, name) = if let Some(user) = msg.from.as_ref() {
        (user.id.0.to_string(), display_name(user))
    } else if let Some(chat) = msg.sender_chat.as_ref() {
        // Anonymous group admins and channels speak as a chat
        let name = chat
            .title()
            .or_else(|| chat.username())
            .map(str::to_string)
            .unwrap_or_else(|| chat.id.0.to_string());
        (chat.id.0.to_string(), name)
    } else {
        return Err(AdapterError::MissingSender);
    };

    let chat_id = msg.chat.id.0.to_string();
    let sender = if msg.chat.is_private() {
        ChatSender::direct(chat_id, name)
    } else {
        ChatSender::group(user_id, chat_id, name)
    };

    Ok(sender.with_raw_metadata(serde_json::json!({
        "message_id": msg.id.0,
        "chat_id": msg.chat.id.0,
    })))
}

/// Map a recipient to the Telegram chat it addresses.
fn resolve_chat_id(recipient: &ChatSender) -> Result<ChatId, AdapterError> {
    let raw = match recipient.chat_type() {
        ChatType::DirectChat => recipient.user_id(),
        ChatType::GroupChat => recipient.group_id().ok_or_else(|| {
            AdapterError::unsupported_recipient(recipient, "group chat without a group id")
        })?,
    };
    raw.parse::<i64>().map(ChatId).map_err(|_| {
        AdapterError::unsupported_recipient(
            recipient,
            format!("'{}' is not a Telegram chat id", raw),
        )
    })
}

/// "audio/ogg" -> "ogg"
fn mime_subtype<M: AsRef<str>>(mime: Option<&M>) -> Option<String> {
    let (_, subtype) = mime?.as_ref().split_once('/')?;
    let subtype = subtype.split(';').next().unwrap_or(subtype).trim();
    (!subtype.is_empty()).then(|| subtype.to_lowercase())
}

fn structured_payload(kind: &str, value: &impl serde::Serialize) -> Option<MessageElement> {
    let payload = serde_json::json!({ "telegram": kind, "value": value });
    serde_json::to_string(&payload).ok().map(MessageElement::Json)
}

/// Payload for content with no mapping of its own (venue, dice, game,
/// invoice, story...). Named after the first field holding an object or a
/// non-empty list.
fn unmapped_content(msg: &Message) -> Option<MessageElement> {
    let value = match &msg.kind {
        MessageKind::Common(common) => serde_json::to_value(&common.media_kind).ok()?,
        MessageKind::Dice(_) | MessageKind::Invoice(_) => serde_json::to_value(&msg.kind).ok()?,
        _ => return None,
    };
    let (kind, payload) = value.as_object()?.iter().find(|(_, v)| match v {
        serde_json::Value::Object(_) => true,
        serde_json::Value::Array(items) => !items.is_empty(),
        _ => false,
    })?;
    structured_payload(kind, payload)
}

/// Wait up to `grace` for in-flight handlers, then cancel the dispatcher task.
async fn wind_down<F>(handlers_done: Option<F>, task: JoinHandle<()>, grace: Duration)
where
    F: std::future::Future<Output = ()>,
{
    if let Some(done) = handlers_done {
        if tokio::time::timeout(grace, done).await.is_err() {
            warn!("Handlers still busy after {:?}, cancelling them", grace);
        }
    }
    task.abort();
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            warn!("Telegram dispatcher task failed: {}", e);
        }
    }
}

struct Running {
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// Telegram connector: long-polls updates into the dispatcher and sends
/// canonical messages back through the Bot API.
#[derive(Clone)]
pub struct TelegramAdapter<T: TelegramApi = Bot> {
    api: T,
    config: TelegramConfig,
    dispatcher: Arc<dyn Dispatcher>,
    loader: Arc<dyn MediaLoader>,
    running: Arc<Mutex<Option<Running>>>,
}

impl<T: TelegramApi> TelegramAdapter<T> {
    pub fn new(api: T, config: TelegramConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            loader: api.media_loader(),
            api,
            config,
            dispatcher,
            running: Arc::new(Mutex::new(None)),
        }
    }

    fn is_allowed(&self, msg: &Message) -> bool {
        if self.config.allowed_user_ids.is_empty() {
            return true;
        }
        msg.from
            .as_ref()
            .is_some_and(|user| self.config.allowed_user_ids.contains(&user.id.0))
    }

    /// Media resource for a Telegram file. Nothing is downloaded until the
    /// bytes are asked for.
    fn remote_media(&self, file_id: &FileId, format: Option<String>) -> Option<MediaResource> {
        let source = MediaSource::remote(file_ref(file_id));
        let source = match format {
            Some(format) => source.with_format(format),
            None => source,
        };
        MediaResource::with_loader(source, self.loader.clone()).ok()
    }

    /// Entry point for every polled message.
    async fn handle_message(&self, msg: Message) -> ResponseResult<()> {
        if msg.text().is_some_and(is_start_command) {
            if let Err(e) = self.api.post_text(msg.chat.id, WELCOME_TEXT).await {
                warn!("Failed to send welcome message: {:#}", e);
            }
            return Ok(());
        }

        let message = match self.convert(&msg).await {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping Telegram message {}: {}", msg.id.0, e);
                return Ok(());
            }
        };
        if message.is_empty() {
            debug!("Telegram message {} has no supported content", msg.id.0);
            return Ok(());
        }

        info!(
            "Telegram message from {}: {}",
            message.sender(),
            message.content()
        );
        dispatch::dispatch_and_reply(self.dispatcher.as_ref(), self, message).await;
        Ok(())
    }

    async fn send_media(&self, chat_id: ChatId, kind: MediaKind, media: &MediaResource) -> Result<()> {
        if let Err(e) = self.api.chat_action(chat_id, kind.upload_action()).await {
            debug!("Failed to send upload action: {:#}", e);
        }

        let file = if let Some(file_id) = media.known_remote_ref().and_then(parse_file_ref) {
            InputFile::file_id(file_id)
        } else if let Some(url) = media.known_remote_ref() {
            InputFile::url(url.parse().context("Invalid media URL")?)
        } else if let Some(path) = media.known_local_path() {
            InputFile::file(path.to_path_buf())
        } else {
            let data = media.get_bytes().await?;
            let name = format!("{}.{}", kind_file_stem(kind), media.format().unwrap_or("bin"));
            InputFile::memory(data.to_vec()).file_name(name)
        };

        self.api.post_media(chat_id, kind, file).await
    }

    async fn send_text(&self, chat_id: ChatId, index: usize, text: &str) -> Result<()> {
        if let Err(e) = self.api.chat_action(chat_id, ChatAction::Typing).await {
            debug!("Failed to send typing action: {:#}", e);
        }

        let per_char = self.config.typing_delay_ms_per_char;
        if index > 0 && per_char > 0 {
            let delay = Duration::from_millis(per_char.saturating_mul(text.chars().count() as u64));
            tokio::time::sleep(delay.min(MAX_TYPING_DELAY)).await;
        }

        for chunk in split_message(text, TELEGRAM_CHUNK_LEN) {
            self.api.post_text(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send one element. `Ok(false)` means the variant has no Telegram
    /// counterpart and was skipped.
    async fn send_element(
        &self,
        chat_id: ChatId,
        index: usize,
        element: &MessageElement,
    ) -> Result<bool> {
        match element {
            MessageElement::Text(text) if text.trim().is_empty() => Ok(false),
            MessageElement::Text(text) => self.send_text(chat_id, index, text).await.map(|_| true),
            MessageElement::Mention(_) => self
                .api
                .post_text(chat_id, &element.to_plain())
                .await
                .map(|_| true),
            MessageElement::Image(media) => self
                .send_media(chat_id, MediaKind::Photo, media)
                .await
                .map(|_| true),
            MessageElement::Voice(media) => self
                .send_media(chat_id, MediaKind::Voice, media)
                .await
                .map(|_| true),
            MessageElement::Video(media) => self
                .send_media(chat_id, MediaKind::Video, media)
                .await
                .map(|_| true),
            MessageElement::File(media) => self
                .send_media(chat_id, MediaKind::Document, media)
                .await
                .map(|_| true),
            MessageElement::Face { face_id } => {
                self.api.post_sticker(chat_id, face_id).await.map(|_| true)
            }
            MessageElement::Reply { .. } | MessageElement::Json(_) => Ok(false),
        }
    }
}

fn kind_file_stem(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "photo",
        MediaKind::Voice => "voice",
        MediaKind::Video => "video",
        MediaKind::Document => "document",
    }
}

#[async_trait]
impl<T: TelegramApi> ImConverter for TelegramAdapter<T> {
    type Event = Message;

    async fn convert(&self, msg: &Message) -> Result<ImMessage, AdapterError> {
        let sender = sender_from_message(msg)?;
        let mut elements = Vec::new();

        if let Some(replied) = msg.reply_to_message() {
            elements.push(MessageElement::reply(replied.id.0.to_string()));
        }

        if let Some(text) = msg.text().or_else(|| msg.caption()) {
            elements.push(MessageElement::text(text));
        }

        // Telegram lists photo sizes smallest first
        if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
            if let Some(media) = self.remote_media(&largest.file.id, None) {
                elements.push(MessageElement::Image(media));
            }
        }

        if let Some(voice) = msg.voice() {
            let format = mime_subtype(voice.mime_type.as_ref());
            if let Some(media) = self.remote_media(&voice.file.id, format) {
                elements.push(MessageElement::Voice(media));
            }
        }

        if let Some(audio) = msg.audio() {
            let format = mime_subtype(audio.mime_type.as_ref());
            if let Some(media) = self.remote_media(&audio.file.id, format) {
                elements.push(MessageElement::Voice(media));
            }
        }

        if let Some(video) = msg.video() {
            let format = mime_subtype(video.mime_type.as_ref());
            if let Some(media) = self.remote_media(&video.file.id, format) {
                elements.push(MessageElement::Video(media));
            }
        }

        if let Some(note) = msg.video_note() {
            if let Some(media) = self.remote_media(&note.file.id, None) {
                elements.push(MessageElement::Video(media));
            }
        }

        if let Some(document) = msg.document() {
            let format = mime_subtype(document.mime_type.as_ref()).or_else(|| {
                document
                    .file_name
                    .as_deref()
                    .and_then(|name| name.rsplit_once('.'))
                    .map(|(_, ext)| ext.to_lowercase())
            });
            if let Some(media) = self.remote_media(&document.file.id, format) {
                elements.push(MessageElement::File(media));
            }
        }

        if let Some(sticker) = msg.sticker() {
            elements.push(MessageElement::face(sticker.file.id.0.clone()));
        }

        // No canonical variant: keep as structured payload
        if let Some(location) = msg.location() {
            elements.extend(structured_payload("location", location));
        }
        if let Some(contact) = msg.contact() {
            elements.extend(structured_payload("contact", contact));
        }
        if let Some(poll) = msg.poll() {
            elements.extend(structured_payload("poll", poll));
        }

        if elements
            .iter()
            .all(|e| matches!(e, MessageElement::Reply { .. }))
        {
            elements.extend(unmapped_content(msg));
        }

        let mut message = ImMessage::new(sender, elements);
        if let Ok(raw) = serde_json::to_value(msg) {
            message = message.with_raw_message(raw);
        }
        Ok(message)
    }
}

#[async_trait]
impl<T: TelegramApi> ImAdapter for TelegramAdapter<T> {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(
        &self,
        message: &ImMessage,
        recipient: &ChatSender,
    ) -> Result<SendReport, AdapterError> {
        let chat_id = resolve_chat_id(recipient)?;
        let mut report = SendReport::default();

        for (index, element) in message.elements().iter().enumerate() {
            match self.send_element(chat_id, index, element).await {
                Ok(true) => report.delivered.push(index),
                Ok(false) => {
                    debug!(
                        "Telegram cannot send {} elements, skipping #{}",
                        element.tag(),
                        index
                    );
                    report.skipped.push(index);
                }
                Err(e) => {
                    warn!(
                        "Failed to send {} element #{} to {}: {:#}",
                        element.tag(),
                        index,
                        chat_id,
                        e
                    );
                    report.failed.push(index);
                }
            }
        }

        Ok(report)
    }

    async fn set_composing_state(&self, chat: &ChatSender, is_composing: bool) {
        let chat_id = match resolve_chat_id(chat) {
            Ok(chat_id) => chat_id,
            Err(e) => {
                warn!("Cannot set composing state: {}", e);
                return;
            }
        };
        if !is_composing {
            // Chat actions expire on their own; there is nothing to cancel
            return;
        }
        debug!("Setting composing state for chat {}", chat_id);
        if let Err(e) = self.api.chat_action(chat_id, ChatAction::Typing).await {
            warn!("Failed to set composing state for {}: {:#}", chat_id, e);
        }
    }

    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Telegram adapter already running");
            return Ok(());
        }

        let bot = self
            .api
            .polling_client()
            .context("Telegram transport does not support long polling")?;

        info!("Starting Telegram platform...");

        let filter_adapter = self.clone();
        let handler = Update::filter_message()
            .filter(move |msg: Message| filter_adapter.is_allowed(&msg))
            .endpoint(|msg: Message, adapter: TelegramAdapter<T>| async move {
                adapter.handle_message(msg).await
            });

        let mut dispatcher = teloxide::dispatching::Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.clone()])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        let shutdown = dispatcher.shutdown_token();
        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        *running = Some(Running { shutdown, task });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            debug!("Telegram adapter not running");
            return Ok(());
        };

        info!("Stopping Telegram platform...");
        let handlers_done = match running.shutdown.shutdown() {
            Ok(done) => Some(done),
            Err(e) => {
                debug!("Telegram dispatcher was idle: {:?}", e);
                None
            }
        };
        wind_down(handlers_done, running.task, SHUTDOWN_GRACE).await;
        Ok(())
    }
}
