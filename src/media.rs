//! Storage for component media (SVG symbols and PNG previews).
//!
//! Files are content-checked, renamed to a random UUID and written below
//! `<media_dir>/components/`. The returned URL is relative to the server
//! root and resolved by the `/media` static file service.

use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MEDIA_URL_PREFIX;
use crate::error::ApiError;

pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const COMPONENT_SUBDIR: &str = "components";
const SVG_SNIFF_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Svg,
    Png,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Svg => "svg",
            MediaKind::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            MediaKind::Svg => "image/svg+xml",
            MediaKind::Png => "image/png",
        }
    }

    /// Whether `bytes` actually hold this kind of file
    fn matches(self, bytes: &[u8]) -> bool {
        match self {
            // PNG: 89 50 4E 47 0D 0A 1A 0A
            MediaKind::Png => bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            MediaKind::Svg => {
                let head = &bytes[..bytes.len().min(SVG_SNIFF_LEN)];
                String::from_utf8_lossy(head).to_ascii_lowercase().contains("<svg")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Empty {} file", .0.extension())]
    Empty(MediaKind),

    #[error("File too large. Maximum size is 5MB.")]
    TooLarge,

    #[error("File content is not a valid {} image.", .0.extension())]
    InvalidContent(MediaKind),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(e) => {
                tracing::error!("Failed to write media file: {}", e);
                ApiError::Internal("save file".to_string())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

pub fn validate(kind: MediaKind, bytes: &[u8]) -> Result<(), MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty(kind));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(MediaError::TooLarge);
    }
    if !kind.matches(bytes) {
        return Err(MediaError::InvalidContent(kind));
    }
    Ok(())
}

/// Validate and store a component media file, returning its public URL.
pub async fn save_component_file(
    media_dir: &Path,
    kind: MediaKind,
    bytes: &[u8],
) -> Result<String, MediaError> {
    validate(kind, bytes)?;

    let dir = media_dir.join(COMPONENT_SUBDIR);
    tokio::fs::create_dir_all(&dir).await?;

    let filename = format!("{}.{}", Uuid::new_v4(), kind.extension());
    tokio::fs::write(dir.join(&filename), bytes).await?;

    tracing::info!(
        mime_type = kind.mime_type(),
        "Component media stored: {} ({} bytes)",
        filename,
        bytes.len()
    );

    Ok(format!("{}/{}/{}", MEDIA_URL_PREFIX, COMPONENT_SUBDIR, filename))
}

/// Delete a file previously returned by [`save_component_file`]. URLs that do
/// not point at a component file are ignored.
pub async fn remove_component_file(media_dir: &Path, url: &str) -> Result<(), MediaError> {
    let prefix = format!("{}/{}/", MEDIA_URL_PREFIX, COMPONENT_SUBDIR);
    let filename = match url.strip_prefix(&prefix) {
        Some(name) if !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']) => {
            name
        }
        _ => {
            tracing::warn!("Refusing to remove non-component media: {}", url);
            return Ok(());
        }
    };

    match tokio::fs::remove_file(media_dir.join(COMPONENT_SUBDIR).join(filename)).await {
        Ok(()) => {
            tracing::info!("Component media removed: {}", filename);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
