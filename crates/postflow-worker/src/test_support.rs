//! Fake publisher, failing store and a wired-up scheduler for tests

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

use postflow_core::models::{
    AssetMetadata, MediaKind, MediaRef, NewPost, Platform, Post, PostFailure,
};
use postflow_core::{PublishError, SchedulerConfig, SchedulerError};
use postflow_db::{
    DueCursor, InMemoryCredentialStore, InMemoryMediaAssetStore, InMemoryPostStore,
    InMemoryVideoJobStore, PostStore,
};
use postflow_media::{MediaLibrary, ResolvedMedia};
use postflow_publishers::{MediaConstraints, PublishReceipt, Publisher, PublisherRegistry};
use postflow_storage::LocalStorage;

use crate::context::SchedulerContext;
use crate::scheduler::Scheduler;

/// Answers publishes from a script of responses, then succeeds.
#[derive(Debug)]
pub struct FakePublisher {
    platform: Platform,
    constraints: MediaConstraints,
    responses: Mutex<VecDeque<Result<PublishReceipt, PublishError>>>,
    delay: Option<Duration>,
    per_recipient: bool,
    calls: AtomicUsize,
    rehydrated: AtomicUsize,
    media_seen: Mutex<Vec<Vec<Uuid>>>,
}

impl FakePublisher {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            constraints: MediaConstraints::new(
                10,
                &[MediaKind::Image, MediaKind::Video, MediaKind::Audio],
            ),
            responses: Mutex::new(VecDeque::new()),
            delay: None,
            per_recipient: false,
            calls: AtomicUsize::new(0),
            rehydrated: AtomicUsize::new(0),
            media_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn responding(mut self, responses: Vec<Result<PublishReceipt, PublishError>>) -> Self {
        self.responses = Mutex::new(responses.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report delivering per recipient, which lifts the scheduler's batch timeout.
    pub fn per_recipient(mut self) -> Self {
        self.per_recipient = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rehydrated(&self) -> usize {
        self.rehydrated.load(Ordering::SeqCst)
    }

    pub async fn media_seen(&self) -> Vec<Vec<Uuid>> {
        self.media_seen.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn constraints(&self) -> &MediaConstraints {
        &self.constraints
    }

    fn delivers_per_recipient(&self) -> bool {
        self.per_recipient
    }

    async fn publish(
        &self,
        _post: &Post,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.media_seen
            .lock()
            .await
            .push(media.iter().map(|m| m.id()).collect());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.responses.lock().await.pop_front() {
            Some(response) => response,
            None => Ok(PublishReceipt::new(format!("remote-{}", call))),
        }
    }

    async fn rehydrate(&self) -> Result<(), PublishError> {
        self.rehydrated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A post store whose backend is unreachable.
pub struct FailingPostStore;

fn unreachable_store() -> SchedulerError {
    SchedulerError::Store(anyhow!("connection refused"))
}

#[async_trait]
impl PostStore for FailingPostStore {
    async fn create_post(&self, _: NewPost, _: i32) -> Result<Post, SchedulerError> {
        Err(unreachable_store())
    }

    async fn get_post(&self, _: Uuid) -> Result<Option<Post>, SchedulerError> {
        Err(unreachable_store())
    }

    async fn schedule(&self, _: Uuid, _: DateTime<Utc>) -> Result<Post, SchedulerError> {
        Err(unreachable_store())
    }

    async fn query_due(
        &self,
        _: DateTime<Utc>,
        _: Option<DueCursor>,
        _: i64,
    ) -> Result<Vec<Post>, SchedulerError> {
        Err(unreachable_store())
    }

    async fn claim(&self, _: Uuid, _: i64) -> Result<Post, SchedulerError> {
        Err(unreachable_store())
    }

    async fn mark_success(
        &self,
        _: Uuid,
        _: &str,
        _: bool,
    ) -> Result<Option<Post>, SchedulerError> {
        Err(unreachable_store())
    }

    async fn mark_failure(
        &self,
        _: Uuid,
        _: PostFailure,
        _: Option<DateTime<Utc>>,
    ) -> Result<Post, SchedulerError> {
        Err(unreachable_store())
    }

    async fn cancel(&self, _: Uuid) -> Result<Post, SchedulerError> {
        Err(unreachable_store())
    }

    async fn fail_stuck_publishing(
        &self,
        _: DateTime<Utc>,
        _: &str,
    ) -> Result<Vec<Post>, SchedulerError> {
        Err(unreachable_store())
    }

    async fn load_media_refs(&self, _: Uuid) -> Result<Vec<MediaRef>, SchedulerError> {
        Err(unreachable_store())
    }
}

pub struct Harness {
    _dir: TempDir,
    pub posts: Arc<InMemoryPostStore>,
    pub jobs: Arc<InMemoryVideoJobStore>,
    pub library: MediaLibrary,
    pub publisher: Arc<FakePublisher>,
    pub scheduler: Scheduler,
}

impl Harness {
    /// Short timeout, small pages and no rate limiting.
    pub fn config() -> SchedulerConfig {
        SchedulerConfig {
            publish_timeout_secs: 1,
            due_batch_size: 2,
            platform_rate_limit_per_minute: 0.0,
            ..SchedulerConfig::default()
        }
    }

    pub async fn new(publisher: FakePublisher) -> Self {
        Self::with_config(publisher, Self::config()).await
    }

    pub async fn with_config(publisher: FakePublisher, config: SchedulerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(
            dir.path(),
            Some("https://cdn.example.com/media".to_string()),
        )
        .await
        .unwrap();
        let library = MediaLibrary::new(
            Arc::new(InMemoryMediaAssetStore::new()),
            Arc::new(storage),
        );
        let posts = Arc::new(InMemoryPostStore::new());
        let jobs = Arc::new(InMemoryVideoJobStore::new());
        let publisher = Arc::new(publisher);
        let registry = PublisherRegistry::new();
        registry.register(publisher.clone()).await;

        let ctx = SchedulerContext::new(
            posts.clone(),
            Arc::new(InMemoryCredentialStore::new()),
            jobs.clone(),
            library.clone(),
            registry,
            config,
        );

        Self {
            _dir: dir,
            posts,
            jobs,
            library,
            publisher,
            scheduler: Scheduler::new(ctx),
        }
    }

    /// Create a post and schedule it for `at`, as if scheduled five minutes earlier.
    pub async fn scheduled_post(&self, post: NewPost, at: DateTime<Utc>) -> Post {
        let post = self.scheduler.create_post(post).await.unwrap();
        self.scheduler
            .schedule(post.id, at, at - chrono::Duration::minutes(5))
            .await
            .unwrap()
    }

    pub async fn image(&self) -> Uuid {
        self.library
            .register_asset(
                b"\x89PNG first image",
                MediaKind::Image,
                AssetMetadata::default().with_filename("first.png"),
            )
            .await
            .unwrap()
    }

    pub async fn post(&self, id: Uuid) -> Post {
        self.posts.get_post(id).await.unwrap().unwrap()
    }
}
