//! Postflow Media Library
//!
//! Content-addressed registration and resolution of images, audio and video,
//! plus ffprobe-based metadata extraction.

pub mod library;
pub mod probe;

pub use library::{MediaError, MediaLibrary, ResolvedMedia};
pub use probe::{MediaProbe, ProbeResult};
