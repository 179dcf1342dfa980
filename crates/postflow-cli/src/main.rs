//! postflow: scheduled publishing worker and operator commands.
//!
//! Configuration comes from the environment (and `.env`). See `Config::from_env`.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use postflow_cli::setup::App;
use postflow_cli::{parse_when, print_json};
use postflow_core::models::{
    content_type_for_extension, AssetMetadata, MediaKind, MediaRef, NewPost, NewVideoJob,
    Platform, ResolutionProfile,
};
use postflow_core::Config;
use postflow_db::VideoJobStore;
use postflow_infra::{init_telemetry, LogFormat};
use postflow_pipeline::PipelineWorker;
use postflow_worker::SchedulerWorker;

#[derive(Parser)]
#[command(name = "postflow", about = "Scheduled multi-platform publishing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the video pipeline until Ctrl-C
    Worker,
    /// Post lifecycle
    Post {
        #[command(subcommand)]
        sub: PostCommands,
    },
    /// Media registry
    Media {
        #[command(subcommand)]
        sub: MediaCommands,
    },
    /// Video generation jobs
    Video {
        #[command(subcommand)]
        sub: VideoCommands,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Create a draft post, optionally scheduling it right away
    Create {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        body: String,
        /// Email subject or blog title
        #[arg(long)]
        title: Option<String>,
        /// `asset:<uuid>`, `video_job:<uuid>` or a bare asset uuid; repeatable
        #[arg(long = "media")]
        media: Vec<MediaRef>,
        /// Email address or phone number; repeatable
        #[arg(long = "recipient")]
        recipients: Vec<String>,
        #[arg(long)]
        max_retries: Option<i32>,
        /// RFC 3339 time or offset like `+15m`
        #[arg(long)]
        at: Option<String>,
    },
    /// Schedule a draft post
    Schedule {
        id: Uuid,
        /// RFC 3339 time or offset like `+15m`
        #[arg(long)]
        at: String,
    },
    /// Return a scheduled post to draft
    Cancel { id: Uuid },
    /// Show a post
    Show { id: Uuid },
}

#[derive(Subcommand)]
enum MediaCommands {
    /// Register a file as a media asset
    Register {
        file: PathBuf,
        /// image, video or audio; inferred from the extension when omitted
        #[arg(long)]
        kind: Option<MediaKind>,
    },
}

#[derive(Subcommand)]
enum VideoCommands {
    /// Create a video job
    Create {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "friendly")]
        tone: String,
        /// Number of script lines to generate
        #[arg(long, default_value = "5")]
        lines: i32,
        #[arg(long)]
        voice: String,
        /// vertical, square or horizontal
        #[arg(long, default_value = "vertical")]
        profile: ResolutionProfile,
        /// Image asset id; repeatable, in slide order
        #[arg(long = "image", required = true)]
        images: Vec<Uuid>,
    },
    /// Run a job's stages now until it completes, fails or backs off
    Run { id: Uuid },
    /// Resume a failed job from the stage that failed
    Restart { id: Uuid },
    /// Show a video job
    Show { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(LogFormat::from_env())?;

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let app = App::build(config).await?;

    match cli.command {
        Commands::Worker => run_worker(&app).await?,
        Commands::Post { sub } => post_command(&app, sub).await?,
        Commands::Media { sub } => media_command(&app, sub).await?,
        Commands::Video { sub } => video_command(&app, sub).await?,
    }
    Ok(())
}

async fn run_worker(app: &App) -> Result<()> {
    let scheduler = SchedulerWorker::new(app.scheduler.clone()).spawn();
    let pipeline = app.pipeline.as_ref().map(|runner| {
        PipelineWorker::new(Arc::clone(runner), app.config.pipeline.poll_interval()).spawn()
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    scheduler.shutdown().await;
    if let Some(pipeline) = pipeline {
        pipeline.shutdown().await;
    }
    Ok(())
}

async fn post_command(app: &App, command: PostCommands) -> Result<()> {
    let scheduler = &app.scheduler;
    match command {
        PostCommands::Create {
            platform,
            body,
            title,
            media,
            recipients,
            max_retries,
            at,
        } => {
            let mut new_post = NewPost::new(platform, body).with_recipients(recipients);
            new_post.media_refs = media;
            if let Some(title) = title {
                new_post = new_post.with_title(title);
            }
            if let Some(max_retries) = max_retries {
                new_post = new_post.with_max_retries(max_retries);
            }

            let mut post = scheduler.create_post(new_post).await?;
            if let Some(at) = at {
                let now = Utc::now();
                post = scheduler.schedule(post.id, parse_when(&at, now)?, now).await?;
            }
            print_json(&post)
        }
        PostCommands::Schedule { id, at } => {
            let now = Utc::now();
            let post = scheduler.schedule(id, parse_when(&at, now)?, now).await?;
            print_json(&post)
        }
        PostCommands::Cancel { id } => print_json(&scheduler.cancel(id).await?),
        PostCommands::Show { id } => {
            let post = scheduler
                .get_post(id)
                .await?
                .ok_or_else(|| anyhow!("Post not found: {}", id))?;
            print_json(&post)
        }
    }
}

async fn media_command(app: &App, command: MediaCommands) -> Result<()> {
    match command {
        MediaCommands::Register { file, kind } => {
            let extension = file
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_lowercase();
            let kind = kind
                .or_else(|| MediaKind::from_extension(&extension))
                .with_context(|| {
                    format!("Cannot infer media kind of {}; pass --kind", file.display())
                })?;

            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let mut metadata =
                AssetMetadata::default().with_content_type(content_type_for_extension(&extension));
            if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                metadata = metadata.with_filename(name);
            }
            match app.probe().probe_path(&file).await {
                Ok(probe) => metadata = probe.apply(metadata),
                Err(e) => tracing::warn!(error = %e, "Could not probe media, registering without metadata"),
            }

            let asset = app.library.register(&data, kind, metadata).await?;
            print_json(&asset)
        }
    }
}

async fn video_command(app: &App, command: VideoCommands) -> Result<()> {
    match command {
        VideoCommands::Create {
            topic,
            tone,
            lines,
            voice,
            profile,
            images,
        } => {
            let job = app
                .pipeline()?
                .create_job(NewVideoJob {
                    topic,
                    tone,
                    target_lines: lines,
                    voice,
                    profile,
                    image_refs: images,
                })
                .await?;
            print_json(&job)
        }
        VideoCommands::Run { id } => {
            let job = app.pipeline()?.run_until_blocked(id).await?;
            print_json(&job)
        }
        VideoCommands::Restart { id } => {
            let job = app.pipeline()?.restart(id).await?;
            print_json(&job)
        }
        VideoCommands::Show { id } => {
            let job = app
                .video_jobs
                .get_job(id)
                .await?
                .ok_or_else(|| anyhow!("Video job not found: {}", id))?;
            print_json(&job)
        }
    }
}
