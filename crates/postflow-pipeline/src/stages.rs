//! Stage handlers
//!
//! One handler per [`PipelineStage`], looked up through [`StageHandlers`]. A
//! handler reads the outputs earlier stages persisted on the job and writes its
//! own output onto it; it never touches the job's stage or attempt fields. A
//! handler whose output is already present does nothing, so re-running a stage
//! after a crash is safe.

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use postflow_core::models::{
    content_type_for_extension, AssetMetadata, MediaKind, PipelineStage, VideoJob,
};
use postflow_core::{StageError, StageResultExt};
use postflow_media::{MediaError, MediaLibrary, ResolvedMedia};

use crate::services::{Composition, ScriptGenerator, ScriptRequest, SpeechSynthesizer, VideoCompositor};
use crate::timeline;

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> PipelineStage;

    async fn run(&self, job: &mut VideoJob) -> Result<(), StageError>;
}

/// Handler table keyed by stage.
#[derive(Clone, Default)]
pub struct StageHandlers {
    handlers: HashMap<PipelineStage, Arc<dyn StageHandler>>,
}

impl StageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three stages wired to the given services.
    pub fn standard(
        library: MediaLibrary,
        voice_catalog: Vec<String>,
        generator: Arc<dyn ScriptGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        compositor: Arc<dyn VideoCompositor>,
    ) -> Self {
        let mut handlers = Self::new();
        handlers.register(Arc::new(ScriptStage::new(generator)));
        handlers.register(Arc::new(SpeechStage::new(
            synthesizer,
            library.clone(),
            voice_catalog,
        )));
        handlers.register(Arc::new(AssemblyStage::new(compositor, library)));
        handlers
    }

    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    pub fn get(&self, stage: PipelineStage) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&stage).cloned()
    }
}

/// Missing or malformed input media cannot fix itself; storage hiccups can.
fn media_error(context: &str, e: MediaError) -> StageError {
    match e {
        MediaError::NotFound(_) | MediaError::Empty(_) => {
            StageError::terminal(anyhow!("{}: {}", context, e))
        }
        other => StageError::recoverable(anyhow!("{}: {}", context, other)),
    }
}

pub struct ScriptStage {
    generator: Arc<dyn ScriptGenerator>,
}

impl ScriptStage {
    pub fn new(generator: Arc<dyn ScriptGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageHandler for ScriptStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Script
    }

    async fn run(&self, job: &mut VideoJob) -> Result<(), StageError> {
        if job.script.as_ref().is_some_and(|s| !s.is_empty()) {
            return Ok(());
        }

        let request = ScriptRequest {
            topic: job.topic.clone(),
            tone: job.tone.clone(),
            lines: job.target_lines.max(1) as usize,
        };
        let script = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| StageError::recoverable(e.context("Script generation failed")))?;
        if script.is_empty() {
            return Err(StageError::recoverable(anyhow!("Script generation returned an empty script")));
        }

        tracing::info!(job_id = %job.id, lines = script.lines.len(), "Script ready");
        job.script = Some(script);
        Ok(())
    }
}

pub struct SpeechStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    library: MediaLibrary,
    voice_catalog: Vec<String>,
}

impl SpeechStage {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        library: MediaLibrary,
        voice_catalog: Vec<String>,
    ) -> Self {
        Self {
            synthesizer,
            library,
            voice_catalog,
        }
    }

    fn supports(&self, voice: &str) -> bool {
        self.voice_catalog
            .iter()
            .any(|v| v.eq_ignore_ascii_case(voice.trim()))
    }
}

#[async_trait]
impl StageHandler for SpeechStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Speech
    }

    async fn run(&self, job: &mut VideoJob) -> Result<(), StageError> {
        if job.audio_asset_id.is_some() && job.audio_duration_ms.is_some() {
            return Ok(());
        }

        if !self.supports(&job.voice) {
            return Err(StageError::terminal(anyhow!(
                "Voice '{}' is not in the voice catalog ({})",
                job.voice,
                self.voice_catalog.join(", ")
            )));
        }

        let narration = job
            .script
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| s.narration())
            .ok_or_else(|| anyhow!("Job {} has no script to narrate", job.id))
            .terminal()?;

        let speech = self
            .synthesizer
            .synthesize(&narration, job.voice.trim())
            .await
            .map_err(|e| StageError::recoverable(e.context("Speech synthesis failed")))?;

        let metadata = AssetMetadata::default()
            .with_content_type(content_type_for_extension(&speech.extension))
            .with_filename(format!("{}-narration.{}", job.id, speech.extension))
            .with_duration_ms(speech.duration_ms);
        let asset_id = self
            .library
            .register_asset(&speech.data, MediaKind::Audio, metadata)
            .await
            .map_err(|e| media_error("Failed to register narration audio", e))?;

        tracing::info!(
            job_id = %job.id,
            asset_id = %asset_id,
            duration_ms = speech.duration_ms,
            "Narration ready"
        );
        job.audio_asset_id = Some(asset_id);
        job.audio_duration_ms = Some(speech.duration_ms);
        Ok(())
    }
}

pub struct AssemblyStage {
    compositor: Arc<dyn VideoCompositor>,
    library: MediaLibrary,
}

impl AssemblyStage {
    pub fn new(compositor: Arc<dyn VideoCompositor>, library: MediaLibrary) -> Self {
        Self {
            compositor,
            library,
        }
    }

    /// A filesystem path for `media`, copying it into `dir` when storage is not local.
    async fn materialize(
        &self,
        media: &ResolvedMedia,
        dir: &Path,
        name: &str,
    ) -> Result<PathBuf, StageError> {
        if let Some(path) = media.local_path.as_ref().filter(|p| p.is_file()) {
            return Ok(path.clone());
        }
        let data = self
            .library
            .fetch(media)
            .await
            .map_err(|e| media_error("Failed to read input media", e))?;
        let path = dir.join(format!("{}.{}", name, media.asset.extension()));
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StageError::recoverable(anyhow!("Failed to stage input media: {}", e)))?;
        Ok(path)
    }

    async fn resolve(&self, id: uuid::Uuid, expected: MediaKind) -> Result<ResolvedMedia, StageError> {
        let media = self
            .library
            .resolve(id)
            .await
            .map_err(|e| media_error("Failed to resolve input media", e))?;
        if media.kind() != expected {
            return Err(StageError::terminal(anyhow!(
                "Asset {} is {}, expected {}",
                id,
                media.kind(),
                expected
            )));
        }
        Ok(media)
    }
}

#[async_trait]
impl StageHandler for AssemblyStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Assembly
    }

    async fn run(&self, job: &mut VideoJob) -> Result<(), StageError> {
        if job.output_asset_id.is_some() {
            return Ok(());
        }

        let (audio_id, duration_ms) = match (job.audio_asset_id, job.audio_duration_ms) {
            (Some(id), Some(ms)) if ms > 0 => (id, ms),
            _ => {
                return Err(StageError::terminal(anyhow!(
                    "Job {} has no narration to assemble",
                    job.id
                )))
            }
        };
        if job.image_refs.is_empty() {
            return Err(StageError::terminal(anyhow!("Job {} has no images", job.id)));
        }

        let workdir = TempDir::new()
            .map_err(|e| StageError::recoverable(anyhow!("Failed to create work directory: {}", e)))?;

        let mut images = Vec::with_capacity(job.image_refs.len());
        for (i, image_id) in job.image_refs.iter().enumerate() {
            let media = self.resolve(*image_id, MediaKind::Image).await?;
            images.push(self.materialize(&media, workdir.path(), &format!("{:03}", i)).await?);
        }
        let audio = self.resolve(audio_id, MediaKind::Audio).await?;
        let audio_path = self.materialize(&audio, workdir.path(), "narration").await?;

        let resolution = job.profile.resolution();
        let composition = Composition {
            slides: timeline::slides(&images, duration_ms),
            audio: audio_path,
            duration_ms,
            resolution,
            output: workdir.path().join("output.mp4"),
        };
        self.compositor
            .compose(&composition)
            .await
            .map_err(|e| StageError::recoverable(e.context("Video assembly failed")))?;

        let data = tokio::fs::read(&composition.output)
            .await
            .map_err(|e| StageError::recoverable(anyhow!("Failed to read assembled video: {}", e)))?;

        let metadata = AssetMetadata::default()
            .with_content_type("video/mp4")
            .with_filename(format!("{}.mp4", job.id))
            .with_duration_ms(duration_ms)
            .with_resolution(resolution);
        let asset_id = self
            .library
            .register_asset(&data, MediaKind::Video, metadata)
            .await
            .map_err(|e| match e {
                MediaError::Empty(_) => {
                    StageError::recoverable(anyhow!("Compositor produced an empty video"))
                }
                other => media_error("Failed to register assembled video", other),
            })?;

        tracing::info!(
            job_id = %job.id,
            asset_id = %asset_id,
            images = images.len(),
            profile = %job.profile,
            "Video assembled"
        );
        job.output_asset_id = Some(asset_id);
        Ok(())
    }
}
