use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use super::sniff::{self, ContentType};

/// Top-level content type of a media resource.
///
/// Stays [`ResourceKind::Media`] until content sniffing identifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Media,
    Image,
    Audio,
    Video,
    File,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Media => "media",
            ResourceKind::Image => "image",
            ResourceKind::Audio => "audio",
            ResourceKind::Video => "video",
            ResourceKind::File => "file",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three ways a media resource can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Remote,
    Local,
    Bytes,
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Remote => write!(f, "remote reference"),
            Representation::Local => write!(f, "local path"),
            Representation::Bytes => write!(f, "bytes"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Zero, several, or an incomplete initial representation was supplied.
    #[error("invalid media source: {reason}")]
    InvalidSource { reason: String },

    /// A public reference cannot be synthesized from a path or raw bytes.
    #[error("no remote representation available")]
    NoRemoteRepresentation,

    /// Fetching, reading or writing the resource failed.
    #[error("failed to resolve media {representation}: {source}")]
    ResolutionFailed {
        representation: Representation,
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    fn invalid_source(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }

    fn resolution(representation: Representation) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::ResolutionFailed {
            representation,
            source,
        }
    }
}

/// The I/O a media resource performs while materializing representations.
#[async_trait]
pub trait MediaLoader: Send + Sync {
    /// Download the full resource behind a remote reference.
    async fn fetch_remote(&self, url: &str) -> std::io::Result<Bytes>;

    /// Read a local file fully into memory.
    async fn read_local(&self, path: &Path) -> std::io::Result<Bytes>;

    /// Write a buffer to a fresh, uniquely named temporary file.
    async fn write_temp(&self, data: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf>;

    /// Identify the content type of a loaded buffer.
    fn sniff(&self, data: &[u8]) -> Option<ContentType> {
        sniff::detect(data)
    }
}

/// Default loader: `reqwest` for remote references, `tokio::fs` for files.
#[derive(Debug, Clone)]
pub struct HttpMediaLoader {
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl HttpMediaLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }
}

impl Default for HttpMediaLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaLoader for HttpMediaLoader {
    async fn fetch_remote(&self, url: &str) -> std::io::Result<Bytes> {
        debug!("Fetching media from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(std::io::Error::other)?
            .error_for_status()
            .map_err(std::io::Error::other)?;
        response.bytes().await.map_err(std::io::Error::other)
    }

    async fn read_local(&self, path: &Path) -> std::io::Result<Bytes> {
        debug!("Reading media from {}", path.display());
        tokio::fs::read(path).await.map(Bytes::from)
    }

    async fn write_temp(&self, data: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf> {
        let name = match extension {
            Some(ext) => format!("chatgate-{}.{}", Uuid::new_v4(), ext),
            None => format!("chatgate-{}", Uuid::new_v4()),
        };
        let path = self.temp_dir.join(name);
        tokio::fs::write(&path, data).await?;
        debug!("Materialized {} bytes of media at {}", data.len(), path.display());
        Ok(path)
    }
}

fn default_loader() -> Arc<dyn MediaLoader> {
    static LOADER: OnceLock<Arc<dyn MediaLoader>> = OnceLock::new();
    LOADER
        .get_or_init(|| Arc::new(HttpMediaLoader::new()))
        .clone()
}

/// The initial representation handed to [`MediaResource::new`].
///
/// Exactly one of `remote_ref`, `local_path` or `bytes` (which also needs
/// `format`) must be set.
#[derive(Debug, Clone, Default)]
pub struct MediaSource {
    pub remote_ref: Option<String>,
    pub local_path: Option<PathBuf>,
    pub bytes: Option<Bytes>,
    pub format: Option<String>,
}

impl MediaSource {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            remote_ref: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn bytes(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            bytes: Some(data.into()),
            format: Some(format.into()),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A binary resource reachable by remote reference, local path or bytes,
/// deriving the other representations lazily.
///
/// Every representation is materialized at most once and cached. Resolution
/// takes `&self`; concurrent first requests share a single fetch or read.
/// Content sniffing runs at most once, and never when a format was supplied.
#[derive(Clone)]
pub struct MediaResource {
    remote_ref: Option<String>,
    local_path: OnceCell<PathBuf>,
    bytes: OnceCell<Bytes>,
    format: Option<String>,
    detected: OnceLock<Option<ContentType>>,
    loader: Arc<dyn MediaLoader>,
}

impl MediaResource {
    pub fn new(source: MediaSource) -> Result<Self, MediaError> {
        Self::with_loader(source, default_loader())
    }

    pub fn with_loader(
        source: MediaSource,
        loader: Arc<dyn MediaLoader>,
    ) -> Result<Self, MediaError> {
        let MediaSource {
            remote_ref,
            local_path,
            bytes,
            format,
        } = source;

        if bytes.is_some() && format.is_none() {
            return Err(MediaError::invalid_source(
                "raw bytes must be accompanied by a format",
            ));
        }

        let supplied = [remote_ref.is_some(), local_path.is_some(), bytes.is_some()]
            .iter()
            .filter(|held| **held)
            .count();
        match supplied {
            0 => {
                return Err(MediaError::invalid_source(
                    "one of remote reference, local path or bytes + format is required",
                ))
            }
            1 => {}
            n => {
                return Err(MediaError::invalid_source(format!(
                    "exactly one representation is allowed, got {}",
                    n
                )))
            }
        }

        Ok(Self {
            remote_ref,
            local_path: OnceCell::new_with(local_path),
            bytes: OnceCell::new_with(bytes),
            format,
            detected: OnceLock::new(),
            loader,
        })
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self::from_known(MediaSource::remote(url))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::from_known(MediaSource::local(path))
    }

    pub fn from_bytes(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self::from_known(MediaSource::bytes(data, format))
    }

    // Only for sources built by the single-representation constructors.
    fn from_known(source: MediaSource) -> Self {
        Self {
            remote_ref: source.remote_ref,
            local_path: OnceCell::new_with(source.local_path),
            bytes: OnceCell::new_with(source.bytes),
            format: source.format,
            detected: OnceLock::new(),
            loader: default_loader(),
        }
    }

    /// The remote reference. Never synthesized: fails unless one was
    /// supplied at construction.
    pub fn get_remote_ref(&self) -> Result<&str, MediaError> {
        self.remote_ref
            .as_deref()
            .ok_or(MediaError::NoRemoteRepresentation)
    }

    /// The resource contents, reading or fetching them on first use.
    pub async fn get_bytes(&self) -> Result<Bytes, MediaError> {
        let bytes = self
            .bytes
            .get_or_try_init(|| async {
                if let Some(path) = self.local_path.get() {
                    self.loader
                        .read_local(path)
                        .await
                        .map_err(MediaError::resolution(Representation::Local))
                } else if let Some(url) = &self.remote_ref {
                    self.loader
                        .fetch_remote(url)
                        .await
                        .map_err(MediaError::resolution(Representation::Remote))
                } else {
                    Err(MediaError::invalid_source("no representation to load from"))
                }
            })
            .await?
            .clone();
        self.detect_format(&bytes);
        Ok(bytes)
    }

    /// A local file holding the contents. Bytes and remote references are
    /// written to a temporary file once; later calls reuse that path.
    pub async fn get_local_path(&self) -> Result<PathBuf, MediaError> {
        let path = self
            .local_path
            .get_or_try_init(|| async {
                let bytes = self.get_bytes().await?;
                self.loader
                    .write_temp(&bytes, self.format())
                    .await
                    .map_err(MediaError::resolution(Representation::Local))
            })
            .await?;
        Ok(path.clone())
    }

    /// Inline `data:` URL for backends or platforms that accept embedded media.
    pub async fn data_url(&self) -> Result<String, MediaError> {
        let bytes = self.get_bytes().await?;
        let mime = match (self.resource_kind(), self.format()) {
            (ResourceKind::Media, _) | (_, None) => "application/octet-stream".to_string(),
            (kind, Some(format)) => format!("{}/{}", kind, format),
        };
        Ok(format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ))
    }

    fn detect_format(&self, bytes: &[u8]) {
        if self.format.is_some() {
            return;
        }
        self.detected.get_or_init(|| {
            let detected = self.loader.sniff(bytes);
            debug!("Sniffed media content type: {:?}", detected);
            detected
        });
    }

    fn detected(&self) -> Option<&ContentType> {
        self.detected.get().and_then(Option::as_ref)
    }

    /// Content subtype (e.g. "png"), supplied or detected.
    pub fn format(&self) -> Option<&str> {
        self.format
            .as_deref()
            .or_else(|| self.detected().map(|c| c.format.as_str()))
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.detected().map(|c| c.kind).unwrap_or_default()
    }

    pub fn known_remote_ref(&self) -> Option<&str> {
        self.remote_ref.as_deref()
    }

    pub fn known_local_path(&self) -> Option<&Path> {
        self.local_path.get().map(PathBuf::as_path)
    }

    pub fn known_bytes(&self) -> Option<&Bytes> {
        self.bytes.get()
    }

    /// Representations currently held, without triggering any I/O.
    pub fn representations(&self) -> Vec<Representation> {
        let mut held = Vec::with_capacity(3);
        if self.remote_ref.is_some() {
            held.push(Representation::Remote);
        }
        if self.local_path.initialized() {
            held.push(Representation::Local);
        }
        if self.bytes.initialized() {
            held.push(Representation::Bytes);
        }
        held
    }

    /// Known fields only; unresolved bytes are left out rather than loaded.
    pub fn to_structured(&self) -> StructuredMedia {
        StructuredMedia {
            url: self.remote_ref.clone(),
            path: self.known_local_path().map(|p| p.display().to_string()),
            data: self
                .known_bytes()
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
            format: self.format().map(str::to_string),
        }
    }
}

impl fmt::Debug for MediaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaResource")
            .field("remote_ref", &self.remote_ref)
            .field("local_path", &self.local_path.get())
            .field("bytes", &self.bytes.get().map(Bytes::len))
            .field("format", &self.format())
            .field("resource_kind", &self.resource_kind())
            .finish()
    }
}

/// Serializable field set shared by all media elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredMedia {
    pub url: Option<String>,
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub format: Option<String>,
}
