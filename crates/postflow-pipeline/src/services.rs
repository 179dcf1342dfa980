//! External services the pipeline stages call
//!
//! Each is a single request/response call. HTTP and ffmpeg implementations live
//! in [`crate::openai`] and [`crate::ffmpeg`]; tests substitute their own.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use postflow_core::models::{Resolution, Script};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub topic: String,
    pub tone: String,
    pub lines: usize,
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, request: &ScriptRequest) -> Result<Script>;
}

/// Synthesized narration with its measured length.
#[derive(Debug, Clone)]
pub struct Speech {
    pub data: Vec<u8>,
    /// File extension of `data`, without the dot.
    pub extension: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Speech>;
}

/// Everything the compositor needs to render one video.
#[derive(Debug, Clone)]
pub struct Composition {
    pub slides: Vec<crate::timeline::Slide>,
    pub audio: PathBuf,
    pub duration_ms: u64,
    pub resolution: Resolution,
    pub output: PathBuf,
}

#[async_trait]
pub trait VideoCompositor: Send + Sync {
    /// Render `composition` to `composition.output`.
    async fn compose(&self, composition: &Composition) -> Result<()>;
}
