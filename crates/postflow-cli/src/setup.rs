//! Wiring of stores, media, publishers and the video pipeline from `Config`.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use postflow_core::models::{Platform, PlatformCredential};
use postflow_core::{Config, PipelineConfig, PlatformSettings};
use postflow_db::{
    CredentialRepository, CredentialStore, MediaAssetRepository, PostRepository,
    VideoJobRepository, VideoJobStore,
};
use postflow_media::{MediaLibrary, MediaProbe};
use postflow_pipeline::{
    FfmpegCompositor, OpenAiScriptGenerator, OpenAiSpeechSynthesizer, PipelineRunner,
    RunnerSettings, StageHandlers,
};
use postflow_publishers::{
    GraphMailOptions, GraphMailPublisher, InstagramOptions, InstagramPublisher, LinkedInOptions,
    LinkedInPublisher, PublisherRegistry, WhatsAppOptions, WhatsAppPublisher, WordPressOptions,
    WordPressPublisher,
};
use postflow_storage::LocalStorage;
use postflow_worker::{Scheduler, SchedulerContext};

pub struct App {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub library: MediaLibrary,
    pub video_jobs: Arc<dyn VideoJobStore>,
    /// `None` when the pipeline's external services are not configured.
    pub pipeline: Option<Arc<PipelineRunner>>,
}

impl App {
    pub async fn build(config: Config) -> Result<Self> {
        let pool = postflow_db::connect(&config.database_url, config.db_max_connections).await?;

        let credentials: Arc<dyn CredentialStore> =
            Arc::new(CredentialRepository::new(pool.clone()));
        let video_jobs: Arc<dyn VideoJobStore> = Arc::new(VideoJobRepository::new(pool.clone()));

        let storage = LocalStorage::new(
            config.storage.local_storage_path.clone(),
            config.storage.public_base_url.clone(),
        )
        .await
        .context("Failed to initialize local storage")?;
        let library = MediaLibrary::new(
            Arc::new(MediaAssetRepository::new(pool.clone())),
            Arc::new(storage),
        );

        seed_credentials(credentials.as_ref(), &config.platforms).await?;
        let publishers = build_publishers(
            &config.platforms,
            credentials.clone(),
            library.clone(),
            config.scheduler.publish_timeout(),
        )
        .await?;

        let context = SchedulerContext::new(
            Arc::new(PostRepository::new(pool)),
            credentials,
            video_jobs.clone(),
            library.clone(),
            publishers,
            config.scheduler.clone(),
        );

        let pipeline = match build_pipeline(&config.pipeline, video_jobs.clone(), library.clone()) {
            Ok(runner) => Some(Arc::new(runner)),
            Err(e) => {
                tracing::warn!(error = %e, "Video pipeline disabled");
                None
            }
        };

        Ok(Self {
            config,
            scheduler: Arc::new(Scheduler::new(context)),
            library,
            video_jobs,
            pipeline,
        })
    }

    pub fn pipeline(&self) -> Result<&Arc<PipelineRunner>> {
        self.pipeline
            .as_ref()
            .context("The video pipeline needs OPENAI_API_KEY to be set")
    }

    pub fn probe(&self) -> MediaProbe {
        MediaProbe::new(self.config.pipeline.ffprobe_path.clone())
    }
}

/// Auth material per configured platform, in the shape each adapter reads.
pub fn credentials_from_settings(settings: &PlatformSettings) -> Vec<PlatformCredential> {
    let mut credentials = Vec::new();

    if let Some(s) = &settings.linkedin {
        credentials.push(PlatformCredential::new(
            Platform::LinkedIn,
            json!({
                "access_token": s.access_token,
                "refresh_token": s.refresh_token,
                "client_id": s.client_id,
                "client_secret": s.client_secret,
            }),
        ));
    }
    if let Some(s) = &settings.instagram {
        credentials.push(PlatformCredential::new(
            Platform::Instagram,
            json!({ "username": s.username, "password": s.password }),
        ));
    }
    if let Some(s) = &settings.wordpress {
        credentials.push(PlatformCredential::new(
            Platform::WordPress,
            json!({ "username": s.username, "app_password": s.app_password }),
        ));
    }
    if let Some(s) = &settings.email {
        credentials.push(PlatformCredential::new(
            Platform::Email,
            json!({
                "tenant_id": s.tenant_id,
                "client_id": s.client_id,
                "client_secret": s.client_secret,
            }),
        ));
    }
    if let Some(s) = &settings.whatsapp {
        credentials.push(PlatformCredential::new(
            Platform::WhatsApp,
            json!({
                "access_token": s.access_token,
                "phone_number_id": s.phone_number_id,
            }),
        ));
    }

    credentials
}

/// Write configured auth material to the credential store. Persisted sessions are kept.
pub async fn seed_credentials(
    store: &dyn CredentialStore,
    settings: &PlatformSettings,
) -> Result<()> {
    for credential in credentials_from_settings(settings) {
        let platform = credential.platform;
        store
            .upsert_credential(credential)
            .await
            .with_context(|| format!("Failed to store {} credential", platform))?;
        tracing::debug!(platform = %platform, "Credential seeded");
    }
    Ok(())
}

/// Register an adapter for every platform with settings present.
///
/// `delivery_timeout` bounds each recipient of the email and WhatsApp adapters.
pub async fn build_publishers(
    settings: &PlatformSettings,
    credentials: Arc<dyn CredentialStore>,
    library: MediaLibrary,
    delivery_timeout: Duration,
) -> Result<PublisherRegistry> {
    let registry = PublisherRegistry::new();

    if let Some(s) = &settings.linkedin {
        let publisher = LinkedInPublisher::new(
            credentials.clone(),
            library.clone(),
            LinkedInOptions::from_settings(s),
        )?;
        registry.register(Arc::new(publisher)).await;
    }
    if let Some(s) = &settings.instagram {
        let publisher = InstagramPublisher::new(
            credentials.clone(),
            library.clone(),
            InstagramOptions::from_settings(s),
        )?;
        registry.register(Arc::new(publisher)).await;
    }
    if let Some(s) = &settings.wordpress {
        let publisher = WordPressPublisher::new(
            credentials.clone(),
            library.clone(),
            WordPressOptions::from_settings(s),
        )?;
        registry.register(Arc::new(publisher)).await;
    }
    if let Some(s) = &settings.email {
        let publisher = GraphMailPublisher::new(
            credentials.clone(),
            library.clone(),
            GraphMailOptions::from_settings(s).with_delivery_timeout(delivery_timeout),
        )?;
        registry.register(Arc::new(publisher)).await;
    }
    if let Some(s) = &settings.whatsapp {
        let publisher = WhatsAppPublisher::new(
            credentials.clone(),
            WhatsAppOptions::from_settings(s).with_delivery_timeout(delivery_timeout),
        )?;
        registry.register(Arc::new(publisher)).await;
    }

    if registry.platforms().await.is_empty() {
        tracing::warn!("No platform is configured; due posts will fail as Misconfigured");
    }
    Ok(registry)
}

pub fn build_pipeline(
    config: &PipelineConfig,
    store: Arc<dyn VideoJobStore>,
    library: MediaLibrary,
) -> Result<PipelineRunner> {
    let generator = OpenAiScriptGenerator::from_config(config)?;
    let synthesizer = OpenAiSpeechSynthesizer::from_config(config)?;
    let compositor = FfmpegCompositor::new(config.ffmpeg_path.clone());

    let handlers = StageHandlers::standard(
        library,
        config.voice_catalog.clone(),
        Arc::new(generator),
        Arc::new(synthesizer),
        Arc::new(compositor),
    );
    Ok(PipelineRunner::new(
        store,
        handlers,
        RunnerSettings::from_config(config),
    ))
}
