//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// The media library writes each blob once under a content-addressed key and
/// never overwrites or deletes it afterwards.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` under `storage_key`. Writing the same key twice keeps the first copy.
    async fn put(&self, storage_key: &str, data: &[u8], content_type: &str) -> StorageResult<()>;

    /// Read a file by its storage key
    async fn get(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Publicly reachable URL of a stored file, when the backend is publicly served.
    ///
    /// Platforms that fetch media themselves (business messaging) can only be
    /// given files for which this returns `Some`.
    fn public_url(&self, storage_key: &str) -> Option<String>;

    /// Filesystem path of a stored file, for tools that read files directly (ffmpeg).
    fn local_path(&self, _storage_key: &str) -> Option<PathBuf> {
        None
    }
}
