//! Test doubles shared by the message-model tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::sniff::{self, ContentType};
use super::MediaLoader;

/// A loader that never touches the network or disk and counts every call.
#[derive(Default)]
pub(crate) struct CountingLoader {
    body: Bytes,
    fail: bool,
    pub fetches: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub sniffs: AtomicUsize,
}

impl CountingLoader {
    pub fn with_body(body: &'static [u8]) -> Self {
        Self {
            body: Bytes::from_static(body),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn total_io(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
            + self.reads.load(Ordering::SeqCst)
            + self.writes.load(Ordering::SeqCst)
    }

    fn respond(&self) -> std::io::Result<Bytes> {
        if self.fail {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "unreachable resource",
            ))
        } else {
            Ok(self.body.clone())
        }
    }
}

#[async_trait]
impl MediaLoader for CountingLoader {
    async fn fetch_remote(&self, _url: &str) -> std::io::Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }

    async fn read_local(&self, _path: &Path) -> std::io::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }

    async fn write_temp(&self, _data: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!(
            "/tmp/counting-{}.{}",
            n,
            extension.unwrap_or("bin")
        )))
    }

    fn sniff(&self, data: &[u8]) -> Option<ContentType> {
        self.sniffs.fetch_add(1, Ordering::SeqCst);
        sniff::detect(data)
    }
}
