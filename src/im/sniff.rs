//! Content-type detection from leading magic bytes.

use super::media::ResourceKind;

/// A detected content type, split into top-level kind and subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub kind: ResourceKind,
    pub format: String,
}

impl ContentType {
    /// Split a MIME type such as "audio/x-wav" into kind and subtype ("wav").
    fn from_mime(mime: &str) -> Option<Self> {
        let (top, subtype) = mime.split_once('/')?;
        let kind = match top {
            "image" => ResourceKind::Image,
            "audio" => ResourceKind::Audio,
            "video" => ResourceKind::Video,
            _ => ResourceKind::File,
        };
        let format = subtype.strip_prefix("x-").unwrap_or(subtype);
        Some(Self {
            kind,
            format: format.to_string(),
        })
    }
}

// `infer` accepts any buffer starting with "BM"; also require a known DIB
// header size so plain text is not taken for a bitmap.
fn plausible_bmp(data: &[u8]) -> bool {
    data.len() >= 18
        && matches!(
            u32::from_le_bytes([data[14], data[15], data[16], data[17]]),
            12 | 40 | 52 | 56 | 64 | 108 | 124
        )
}

/// Detect the content type of a buffer, or `None` when no signature matches.
pub fn detect(data: &[u8]) -> Option<ContentType> {
    let matched = infer::get(data)?;
    let mime = matched.mime_type();
    if mime == "image/bmp" && !plausible_bmp(data) {
        return None;
    }
    ContentType::from_mime(mime)
}
