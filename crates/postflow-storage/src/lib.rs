//! Postflow Storage Library
//!
//! Blob storage behind the media library.
//!
//! # Storage key format
//!
//! Keys are content addressed: `media/{kind}/{hash[..2]}/{hash}.{ext}`, where
//! `hash` is the hex SHA-256 of the bytes. Keys must not contain `..` or a
//! leading `/`.

pub mod keys;
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use keys::content_key;
pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult};
