use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 2048;

pub const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];
pub const VIDEO_MIMES: &[&str] = &["video/mp4", "video/quicktime"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Posts,
    Avatars,
    Stories,
    Albums,
}

impl UploadKind {
    pub const ALL: [UploadKind; 4] = [
        UploadKind::Posts,
        UploadKind::Avatars,
        UploadKind::Stories,
        UploadKind::Albums,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Avatars => "avatars",
            Self::Stories => "stories",
            Self::Albums => "albums",
        }
    }

    pub fn allows_video(self) -> bool {
        !matches!(self, Self::Avatars)
    }

    pub fn allowed_mimes(self) -> Vec<&'static str> {
        let mut allowed = IMAGE_MIMES.to_vec();
        if self.allows_video() {
            allowed.extend_from_slice(VIDEO_MIMES);
        }
        allowed
    }
}

impl FromStr for UploadKind {
    type Err = MediaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or(MediaError::InvalidKind)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid type. Allowed: posts, avatars, stories, albums")]
    InvalidKind,
    #[error("Invalid file type. Allowed: {allowed}")]
    UnsupportedType { allowed: String },
    #[error("File too large. Max size: {max_mb} MB")]
    TooLarge { max_mb: usize },
    #[error("File content does not match declared type")]
    ContentMismatch,
}

pub fn is_video_mime(mime: &str) -> bool {
    VIDEO_MIMES.contains(&mime)
}

/// Checks the declared mime against the upload kind, the size limit for that mime, and
/// the leading bytes of the content.
pub fn validate_file(
    mime: &str,
    size: usize,
    kind: UploadKind,
    content: Option<&[u8]>,
) -> Result<(), MediaError> {
    let allowed = kind.allowed_mimes();
    if !allowed.contains(&mime) {
        return Err(MediaError::UnsupportedType {
            allowed: allowed.join(", "),
        });
    }
    let max = if is_video_mime(mime) {
        MAX_VIDEO_BYTES
    } else {
        MAX_IMAGE_BYTES
    };
    if size > max {
        return Err(MediaError::TooLarge {
            max_mb: max / 1024 / 1024,
        });
    }
    if let Some(content) = content {
        if !magic_bytes_match(mime, content) {
            return Err(MediaError::ContentMismatch);
        }
    }
    Ok(())
}

pub fn magic_bytes_match(mime: &str, content: &[u8]) -> bool {
    match mime {
        "image/jpeg" => content.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => content.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
        "image/gif" => content.starts_with(b"GIF8"),
        "image/webp" => content.len() >= 12 && &content[0..4] == b"RIFF" && &content[8..12] == b"WEBP",
        "video/mp4" | "video/quicktime" => content.len() >= 8 && &content[4..8] == b"ftyp",
        _ => false,
    }
}

pub fn ext_from_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        _ => ".bin",
    }
}

/// Keeps the client's extension when it is short and alphanumeric, otherwise derives one.
pub fn choose_extension(original_name: Option<&str>, mime: &str) -> String {
    let from_name = original_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|ch| ch.is_ascii_alphanumeric()));
    match from_name {
        Some(ext) => format!(".{ext}"),
        None => ext_from_mime(mime).to_string(),
    }
}

pub fn content_type_from_ext(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Downscales JPEG and PNG images whose longer side exceeds `max_dimension`.
///
/// Returns `None` when the content is left as is.
pub fn resize_if_needed(mime: &str, content: &[u8], max_dimension: u32) -> Result<Option<Vec<u8>>> {
    let format = match mime {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        _ => return Ok(None),
    };
    let decoded = image::load_from_memory_with_format(content, format)
        .map_err(|err| anyhow!("decode image: {err}"))?;
    if decoded.width() <= max_dimension && decoded.height() <= max_dimension {
        return Ok(None);
    }

    let resized = decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => resized
            .to_rgb8()
            .write_to(&mut out, ImageFormat::Jpeg)
            .map_err(|err| anyhow!("encode jpeg: {err}"))?,
        _ => resized
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| anyhow!("encode png: {err}"))?,
    }
    Ok(Some(out.into_inner()))
}

pub async fn resize_blocking(mime: String, content: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        match resize_if_needed(&mime, &content, MAX_IMAGE_DIMENSION)? {
            Some(resized) => Ok(resized),
            None => Ok(content),
        }
    })
    .await
    .map_err(|err| anyhow!("resize task failed: {err}"))?
}
