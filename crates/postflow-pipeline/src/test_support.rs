//! Fake services and a wired-up runner for pipeline tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

use postflow_core::models::{
    AssetMetadata, MediaKind, NewVideoJob, ResolutionProfile, Script, VideoJob,
};
use postflow_core::BackoffPolicy;
use postflow_db::{InMemoryMediaAssetStore, InMemoryVideoJobStore};
use postflow_media::MediaLibrary;
use postflow_storage::LocalStorage;

use crate::runner::{PipelineRunner, RunnerSettings};
use crate::services::{
    Composition, ScriptGenerator, ScriptRequest, Speech, SpeechSynthesizer, VideoCompositor,
};
use crate::stages::StageHandlers;

#[derive(Default)]
pub struct FakeScriptGenerator {
    calls: AtomicUsize,
}

impl FakeScriptGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptGenerator for FakeScriptGenerator {
    async fn generate(&self, request: &ScriptRequest) -> Result<Script> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Script {
            lines: (1..=request.lines)
                .map(|i| format!("Line {} about {}", i, request.topic))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SpeechBehavior {
    /// Succeed with audio of this many milliseconds.
    Ok(u64),
    /// Fail this many times, then succeed with four seconds of audio.
    FailTimes(usize),
    Hang,
}

pub struct FakeSpeechSynthesizer {
    behavior: SpeechBehavior,
    calls: AtomicUsize,
}

impl FakeSpeechSynthesizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Speech> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let duration_ms = match self.behavior {
            SpeechBehavior::Ok(ms) => ms,
            SpeechBehavior::FailTimes(n) if call < n => {
                return Err(anyhow!("speech service unavailable (503)"))
            }
            SpeechBehavior::FailTimes(_) => 4_000,
            SpeechBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                4_000
            }
        };
        Ok(Speech {
            data: format!("{}|{}|{}", voice, duration_ms, text).into_bytes(),
            extension: "mp3".to_string(),
            duration_ms,
        })
    }
}

/// Writes a small file instead of rendering, and remembers the slide timing.
#[derive(Default)]
pub struct RecordingCompositor {
    durations: Mutex<Vec<u64>>,
}

impl RecordingCompositor {
    pub async fn durations(&self) -> Vec<u64> {
        self.durations.lock().await.clone()
    }
}

#[async_trait]
impl VideoCompositor for RecordingCompositor {
    async fn compose(&self, composition: &Composition) -> Result<()> {
        for slide in &composition.slides {
            anyhow::ensure!(slide.image.is_file(), "missing slide {}", slide.image.display());
        }
        anyhow::ensure!(composition.audio.is_file(), "missing audio");

        let durations: Vec<u64> = composition.slides.iter().map(|s| s.duration_ms).collect();
        tokio::fs::write(&composition.output, format!("video {:?}", durations)).await?;
        *self.durations.lock().await = durations;
        Ok(())
    }
}

pub struct Fixture {
    _dir: TempDir,
    pub library: MediaLibrary,
    pub store: Arc<InMemoryVideoJobStore>,
    pub generator: Arc<FakeScriptGenerator>,
    pub synthesizer: Arc<FakeSpeechSynthesizer>,
    pub compositor: Arc<RecordingCompositor>,
    pub runner: PipelineRunner,
}

impl Fixture {
    pub fn settings() -> RunnerSettings {
        RunnerSettings {
            max_stage_attempts: 3,
            script_timeout: Duration::from_secs(5),
            speech_timeout: Duration::from_secs(5),
            assembly_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(600)),
        }
    }

    pub async fn new(behavior: SpeechBehavior) -> Self {
        Self::with_settings(behavior, Self::settings()).await
    }

    pub async fn with_settings(behavior: SpeechBehavior, settings: RunnerSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();
        let library = MediaLibrary::new(
            Arc::new(InMemoryMediaAssetStore::new()),
            Arc::new(storage),
        );
        let store = Arc::new(InMemoryVideoJobStore::new());
        let generator = Arc::new(FakeScriptGenerator::default());
        let synthesizer = Arc::new(FakeSpeechSynthesizer {
            behavior,
            calls: AtomicUsize::new(0),
        });
        let compositor = Arc::new(RecordingCompositor::default());

        let handlers = StageHandlers::standard(
            library.clone(),
            vec!["alloy".to_string(), "nova".to_string()],
            generator.clone(),
            synthesizer.clone(),
            compositor.clone(),
        );
        let runner = PipelineRunner::new(store.clone(), handlers, settings);

        Self {
            _dir: dir,
            library,
            store,
            generator,
            synthesizer,
            compositor,
            runner,
        }
    }

    /// A job over `images` freshly registered images.
    pub async fn job(&self, images: usize, voice: &str) -> VideoJob {
        let mut image_refs = Vec::with_capacity(images);
        for i in 0..images {
            let id = self
                .library
                .register_asset(
                    format!("image-{}", i).as_bytes(),
                    MediaKind::Image,
                    AssetMetadata::default().with_filename(format!("slide-{}.png", i)),
                )
                .await
                .unwrap();
            image_refs.push(id);
        }

        self.runner
            .create_job(NewVideoJob {
                topic: "autumn menu".to_string(),
                tone: "cosy".to_string(),
                target_lines: 3,
                voice: voice.to_string(),
                profile: ResolutionProfile::Vertical,
                image_refs,
            })
            .await
            .unwrap()
    }
}
