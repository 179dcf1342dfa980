//! Scheduler context
//!
//! Everything the scheduler talks to, built once at startup and passed in
//! explicitly.

use std::sync::Arc;

use postflow_core::{BackoffPolicy, SchedulerConfig};
use postflow_db::{CredentialStore, PostStore, VideoJobStore};
use postflow_infra::RateLimiter;
use postflow_media::MediaLibrary;
use postflow_publishers::PublisherRegistry;

#[derive(Clone)]
pub struct SchedulerContext {
    pub posts: Arc<dyn PostStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub video_jobs: Arc<dyn VideoJobStore>,
    pub library: MediaLibrary,
    pub publishers: PublisherRegistry,
    pub rate_limiter: RateLimiter,
    pub config: SchedulerConfig,
}

impl SchedulerContext {
    pub fn new(
        posts: Arc<dyn PostStore>,
        credentials: Arc<dyn CredentialStore>,
        video_jobs: Arc<dyn VideoJobStore>,
        library: MediaLibrary,
        publishers: PublisherRegistry,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            posts,
            credentials,
            video_jobs,
            library,
            publishers,
            rate_limiter: RateLimiter::new(config.platform_rate_limit_per_minute),
            config,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.config.backoff()
    }
}
