//! Store abstractions
//!
//! Every store has a Postgres implementation and an in-memory one. The
//! scheduler, media library and video pipeline only ever see these traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use postflow_core::models::{
    MediaAsset, MediaKind, MediaRef, NewPost, NewVideoJob, Platform, PlatformCredential, Post, PostFailure,
    VideoJob,
};
use postflow_core::SchedulerError;

/// Position after which `query_due` continues, so one poll can page through due posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueCursor {
    pub scheduled_at: DateTime<Utc>,
    pub id: Uuid,
}

impl DueCursor {
    pub fn after(post: &Post) -> Option<Self> {
        post.scheduled_at.map(|scheduled_at| Self {
            scheduled_at,
            id: post.id,
        })
    }
}

/// Persistence for posts and their lifecycle transitions.
///
/// Every transition bumps `version`; `claim` is the only way into `publishing`
/// and succeeds for exactly one caller per version.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a draft post.
    async fn create_post(&self, post: NewPost, default_max_retries: i32)
        -> Result<Post, SchedulerError>;

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, SchedulerError>;

    /// draft → scheduled at `at`. Resets the retry budget.
    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<Post, SchedulerError>;

    /// Scheduled posts due at `now`, oldest `scheduled_at` first, strictly after `after`.
    async fn query_due(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: i64,
    ) -> Result<Vec<Post>, SchedulerError>;

    /// scheduled → publishing iff the stored version equals `expected_version`.
    async fn claim(&self, id: Uuid, expected_version: i64) -> Result<Post, SchedulerError>;

    /// publishing → published, or delete the row when `delete` is set.
    ///
    /// Repeating the call on an already published post returns it unchanged.
    /// Returns `None` when the row was deleted.
    async fn mark_success(
        &self,
        id: Uuid,
        remote_id: &str,
        delete: bool,
    ) -> Result<Option<Post>, SchedulerError>;

    /// publishing → scheduled with `backoff_until` when given, publishing → failed otherwise.
    async fn mark_failure(
        &self,
        id: Uuid,
        failure: PostFailure,
        backoff_until: Option<DateTime<Utc>>,
    ) -> Result<Post, SchedulerError>;

    /// scheduled → draft.
    async fn cancel(&self, id: Uuid) -> Result<Post, SchedulerError>;

    /// publishing → failed for every post claimed before `claimed_before`.
    ///
    /// Such a post was abandoned mid-publish and may or may not have gone out,
    /// so it is never rescheduled. Its `last_error` becomes a
    /// `ManualInterventionRequired` failure carrying `message`.
    async fn fail_stuck_publishing(
        &self,
        claimed_before: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<Post>, SchedulerError>;

    async fn load_media_refs(&self, id: Uuid) -> Result<Vec<MediaRef>, SchedulerError>;
}

/// Append-only registry rows for stored media.
#[async_trait]
pub trait MediaAssetStore: Send + Sync {
    /// Insert an asset, or return the existing one with the same content hash and kind.
    async fn insert_asset(&self, asset: MediaAsset) -> Result<MediaAsset>;

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>>;

    async fn find_by_hash(
        &self,
        content_hash: &str,
        kind: MediaKind,
    ) -> Result<Option<MediaAsset>>;
}

/// Authentication material and persisted sessions per platform.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, platform: Platform) -> Result<Option<PlatformCredential>>;

    /// Replace the auth material, keeping any persisted session.
    async fn upsert_credential(&self, credential: PlatformCredential) -> Result<()>;

    /// Persist the adapter's session blob, creating the row if needed.
    async fn put_session(&self, platform: Platform, session: serde_json::Value) -> Result<()>;

    async fn clear_session(&self, platform: Platform) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Video job {id} was modified concurrently (expected version {expected_version})")]
    Conflict { id: Uuid, expected_version: i64 },

    #[error("Video job not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Persistence for video jobs.
///
/// A runner `acquire`s a job (taking a lease), runs one stage and `save`s the
/// outcome with the version it acquired. A save with a stale version fails, so
/// the stage field never has two writers.
#[async_trait]
pub trait VideoJobStore: Send + Sync {
    async fn create_job(&self, job: NewVideoJob) -> Result<VideoJob, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<VideoJob>, StoreError>;

    /// Take the lease on a runnable job until `lease_until`. `None` when the job
    /// is terminal, leased by someone else or waiting for its next attempt.
    async fn acquire(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<VideoJob>, StoreError>;

    /// Write `job` back if the stored version still equals `expected_version`.
    async fn save(&self, job: &VideoJob, expected_version: i64) -> Result<VideoJob, StoreError>;

    /// Ids of jobs a runner could acquire at `now`, oldest first.
    async fn list_runnable(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, StoreError>;
}
