//! Local disk storage for uploaded images.
//!
//! Uploads are checked twice: the declared content type must be allowed, and
//! the bytes themselves must sniff as the same image format.

pub mod archive;

use image::{ImageFormat, ImageReader};
use rand::Rng;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UploadConfig;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("file content does not match its declared type")]
    ContentMismatch,

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Image formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

/// A file written to the upload directory
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: usize,
    pub kind: ImageKind,
}

impl StoredFile {
    pub fn url(&self) -> String {
        format!("/uploads/{}", self.filename)
    }
}

pub struct MediaStorage {
    dir: PathBuf,
    max_file_size: usize,
    allowed_types: Vec<String>,
}

impl MediaStorage {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_file_size: config.max_file_size,
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Check size, declared type and sniffed format
    pub fn validate(&self, content_type: &str, bytes: &[u8]) -> Result<ImageKind, StorageError> {
        if bytes.len() > self.max_file_size {
            return Err(StorageError::TooLarge {
                limit: self.max_file_size,
            });
        }

        let declared = content_type.to_ascii_lowercase();
        if !self.allowed_types.iter().any(|t| *t == declared) {
            return Err(StorageError::UnsupportedType(content_type.to_string()));
        }
        let kind = ImageKind::from_content_type(&declared)
            .ok_or_else(|| StorageError::UnsupportedType(content_type.to_string()))?;

        let sniffed = match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => ImageKind::Jpeg,
            Ok(ImageFormat::Png) => ImageKind::Png,
            _ => return Err(StorageError::ContentMismatch),
        };

        if sniffed != kind {
            return Err(StorageError::ContentMismatch);
        }

        Ok(kind)
    }

    /// Write validated bytes under a fresh unique name
    pub async fn save(&self, kind: ImageKind, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let filename = unique_filename(kind);
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes).await?;

        debug!(filename = %filename, size = bytes.len(), "Stored upload");

        Ok(StoredFile {
            filename,
            path,
            size: bytes.len(),
            kind,
        })
    }

    /// Resolve a stored filename; only the final path component is honored
    pub fn path_for(&self, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename).file_name()?.to_str()?;
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Remove a stored file. A missing file is not an error.
    pub async fn delete(&self, filename: &str) -> Result<(), StorageError> {
        let Some(path) = self.path_for(filename) else {
            return Ok(());
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete and log instead of failing; used on cleanup paths
    pub async fn discard(&self, filename: &str) {
        if let Err(e) = self.delete(filename).await {
            warn!(filename = %filename, error = %e, "Failed to remove stored file");
        }
    }
}

/// Width and height from the image header, without decoding pixels
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn unique_filename(kind: ImageKind) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("media-{}-{}.{}", millis, suffix, kind.extension())
}
