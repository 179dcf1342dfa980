//! Post lifecycle and dispatch
//!
//! `draft --schedule--> scheduled --claim--> publishing --success--> published`.
//! A failed attempt goes back to `scheduled` with a backoff while attempts
//! remain, and to `failed` otherwise. `claim` is the only way into `publishing`,
//! so two schedulers polling the same store never publish a post twice.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use postflow_core::models::{MediaRef, NewPost, Post, PostFailure, PostStatus, VideoStage};
use postflow_core::{PublishError, SchedulerError};
use postflow_db::DueCursor;
use postflow_media::{MediaError, ResolvedMedia};
use postflow_publishers::PublishReceipt;

use crate::context::SchedulerContext;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub published: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Left scheduled because a referenced video is still rendering.
    pub skipped: usize,
    /// Claimed by another worker first.
    pub conflicts: usize,
    /// Found stuck in `publishing` and failed for manual review.
    pub abandoned: usize,
}

impl TickReport {
    pub fn total(&self) -> usize {
        self.published
            + self.rescheduled
            + self.failed
            + self.skipped
            + self.conflicts
            + self.abandoned
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published => self.published += 1,
            Outcome::Rescheduled => self.rescheduled += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Conflict => self.conflicts += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Rescheduled,
    Failed,
    Skipped,
    Conflict,
}

/// Whether the videos a post references can be published yet.
enum Readiness {
    /// Output asset per referenced video job.
    Ready(HashMap<Uuid, Uuid>),
    Waiting(Uuid),
    Unavailable(PublishError),
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: SchedulerContext,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    /// Let every publisher load its persisted sessions before the first tick.
    pub async fn rehydrate(&self) {
        self.ctx.publishers.rehydrate_all().await;
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Post, SchedulerError> {
        let post = self
            .ctx
            .posts
            .create_post(post, self.ctx.config.max_retries)
            .await?;
        tracing::info!(post_id = %post.id, platform = %post.platform, "Post created");
        Ok(post)
    }

    pub async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>, SchedulerError> {
        self.ctx.posts.get_post(post_id).await
    }

    /// draft → scheduled. `at` has to be in the future relative to `now`.
    #[tracing::instrument(skip(self))]
    pub async fn schedule(
        &self,
        post_id: Uuid,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Post, SchedulerError> {
        if at <= now {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{} is not in the future",
                at.to_rfc3339()
            )));
        }
        let post = self.ctx.posts.schedule(post_id, at).await?;
        tracing::info!(post_id = %post_id, scheduled_at = %at, "Post scheduled");
        Ok(post)
    }

    /// scheduled → draft. Only possible before a worker claims the post.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, post_id: Uuid) -> Result<Post, SchedulerError> {
        let post = self.ctx.posts.cancel(post_id).await?;
        tracing::info!(post_id = %post_id, "Post cancelled");
        Ok(post)
    }

    /// Scheduled posts due at `now`, oldest first, fetched from the store one
    /// page at a time as the stream is consumed.
    pub fn poll_due(
        &self,
        now: DateTime<Utc>,
    ) -> impl Stream<Item = Result<Post, SchedulerError>> + Send + 'static {
        let posts = self.ctx.posts.clone();
        let batch_size = self.ctx.config.due_batch_size.max(1);

        stream::try_unfold(Some(None::<DueCursor>), move |cursor| {
            let posts = posts.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = posts.query_due(now, after, batch_size).await?;
                let next = if (page.len() as i64) < batch_size {
                    None
                } else {
                    page.last().and_then(DueCursor::after).map(Some)
                };
                let items = stream::iter(page.into_iter().map(Ok::<Post, SchedulerError>));
                Ok::<_, SchedulerError>(Some((items, next)))
            }
        })
        .try_flatten()
    }

    #[tracing::instrument(skip(self))]
    pub async fn claim(&self, post_id: Uuid, expected_version: i64) -> Result<Post, SchedulerError> {
        self.ctx.posts.claim(post_id, expected_version).await
    }

    /// publishing → published, or removal under the delete-on-publish policy.
    /// Repeating it for an already published post is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn record_success(
        &self,
        post_id: Uuid,
        remote_id: &str,
    ) -> Result<Option<Post>, SchedulerError> {
        self.ctx
            .posts
            .mark_success(post_id, remote_id, self.ctx.config.delete_on_publish)
            .await
    }

    pub async fn record_failure(
        &self,
        post_id: Uuid,
        error: &PublishError,
        retryable: bool,
    ) -> Result<Post, SchedulerError> {
        self.record_failure_at(post_id, error, retryable, Utc::now())
            .await
    }

    /// publishing → scheduled with a backoff when `retryable` and attempts
    /// remain, publishing → failed otherwise.
    #[tracing::instrument(skip(self, error), fields(error_kind = %error.kind()))]
    pub async fn record_failure_at(
        &self,
        post_id: Uuid,
        error: &PublishError,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<Post, SchedulerError> {
        let post = self
            .ctx
            .posts
            .get_post(post_id)
            .await?
            .ok_or(SchedulerError::NotFound(post_id))?;

        let failure = PostFailure {
            kind: error.kind(),
            platform: post.platform,
            message: error.to_string(),
        };
        let backoff_until = (retryable && post.has_attempts_left()).then(|| {
            self.ctx.backoff().next_attempt_at(
                now,
                post.retry_count.max(0) as u32,
                error.retry_after(),
            )
        });

        self.ctx
            .posts
            .mark_failure(post_id, failure, backoff_until)
            .await
    }

    /// publishing → failed for posts whose claim is older than the stuck
    /// threshold, left behind by a worker that stopped mid-publish.
    ///
    /// Whether such a post reached the platform is unknown, so it is never retried.
    #[tracing::instrument(skip(self))]
    pub async fn fail_stuck(&self, now: DateTime<Utc>) -> Result<Vec<Post>, SchedulerError> {
        let after = self.ctx.config.stuck_publishing_after();
        let claimed_before = now
            - chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::hours(1));
        let message = format!(
            "Still publishing {}s after its claim; the outcome is unknown, check the platform before rescheduling",
            after.as_secs()
        );

        let failed = self
            .ctx
            .posts
            .fail_stuck_publishing(claimed_before, &message)
            .await?;
        for post in &failed {
            tracing::error!(post_id = %post.id, platform = %post.platform, "Stuck post marked failed");
        }
        Ok(failed)
    }

    /// Fail stuck posts, then dispatch every post due at `now`, one at a time.
    ///
    /// Only a failure to list due posts aborts the tick; anything that goes
    /// wrong with a single post is recorded on it and logged.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::default();
        match self.fail_stuck(now).await {
            Ok(failed) => report.abandoned = failed.len(),
            Err(e) => tracing::warn!(error = %e, "Failed to check for stuck posts"),
        }

        let mut due = Box::pin(self.poll_due(now));

        while let Some(post) = due.try_next().await? {
            let outcome = self.dispatch(post, now).await;
            report.record(outcome);
        }

        if report.total() > 0 {
            tracing::info!(
                published = report.published,
                rescheduled = report.rescheduled,
                failed = report.failed,
                skipped = report.skipped,
                conflicts = report.conflicts,
                abandoned = report.abandoned,
                "Scheduler tick complete"
            );
        } else {
            tracing::trace!("No posts due");
        }
        Ok(report)
    }

    #[tracing::instrument(skip(self, post, now), fields(post_id = %post.id, platform = %post.platform))]
    async fn dispatch(&self, post: Post, now: DateTime<Utc>) -> Outcome {
        let outputs = match self.video_readiness(&post).await {
            Ok(Readiness::Waiting(job_id)) => {
                tracing::debug!(video_job_id = %job_id, "Referenced video not ready, skipping post");
                return Outcome::Skipped;
            }
            Ok(Readiness::Ready(outputs)) => Ok(outputs),
            Ok(Readiness::Unavailable(err)) => Err(err),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check referenced video jobs, skipping post");
                return Outcome::Skipped;
            }
        };

        let claimed = match self.claim(post.id, post.version).await {
            Ok(claimed) => claimed,
            Err(SchedulerError::ClaimConflict { .. }) => {
                tracing::info!("Post already claimed by another worker");
                return Outcome::Conflict;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim post");
                return Outcome::Skipped;
            }
        };

        let result = match outputs {
            Ok(outputs) => self.publish(&claimed, &outputs).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(receipt) => {
                if let Err(e) = self.record_success(claimed.id, &receipt.remote_id).await {
                    tracing::error!(
                        error = %e,
                        remote_id = %receipt.remote_id,
                        "Post was published but recording it failed"
                    );
                } else {
                    tracing::info!(
                        remote_id = %receipt.remote_id,
                        attempt = claimed.retry_count + 1,
                        "Post published"
                    );
                }
                Outcome::Published
            }
            Err(err) => {
                let retryable = err.is_retryable();
                match self.record_failure_at(claimed.id, &err, retryable, now).await {
                    Ok(updated) if updated.status == PostStatus::Scheduled => {
                        tracing::warn!(
                            error = %err,
                            retry_count = updated.retry_count,
                            max_retries = updated.max_retries,
                            backoff_until = ?updated.backoff_until,
                            "Publish failed, post rescheduled"
                        );
                        Outcome::Rescheduled
                    }
                    Ok(updated) => {
                        tracing::error!(
                            error = %err,
                            retryable,
                            retry_count = updated.retry_count,
                            "Publish failed, post marked failed"
                        );
                        Outcome::Failed
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            publish_error = %err,
                            "Failed to record publish failure"
                        );
                        Outcome::Failed
                    }
                }
            }
        }
    }

    async fn video_readiness(&self, post: &Post) -> Result<Readiness, SchedulerError> {
        let mut outputs = HashMap::new();
        for job_id in post.video_job_refs() {
            let job = self
                .ctx
                .video_jobs
                .get_job(job_id)
                .await
                .map_err(|e| SchedulerError::Store(e.into()))?;

            let Some(job) = job else {
                return Ok(Readiness::Unavailable(PublishError::MediaUnavailable(
                    format!("Video job {} not found", job_id),
                )));
            };

            match (job.stage, job.output_asset_id) {
                (VideoStage::Complete, Some(asset_id)) => {
                    outputs.insert(job_id, asset_id);
                }
                (VideoStage::Complete, None) => {
                    return Ok(Readiness::Unavailable(PublishError::MediaUnavailable(
                        format!("Video job {} completed without an output asset", job_id),
                    )));
                }
                (VideoStage::Failed, _) => {
                    let reason = job
                        .failure
                        .map(|f| format!(" at {}: {}", f.stage, f.reason))
                        .unwrap_or_default();
                    return Ok(Readiness::Unavailable(PublishError::MediaUnavailable(
                        format!("Video job {} failed{}", job_id, reason),
                    )));
                }
                _ => return Ok(Readiness::Waiting(job_id)),
            }
        }
        Ok(Readiness::Ready(outputs))
    }

    async fn resolve_media(
        &self,
        post: &Post,
        outputs: &HashMap<Uuid, Uuid>,
    ) -> Result<Vec<ResolvedMedia>, PublishError> {
        let mut media = Vec::with_capacity(post.media_refs.len());
        for media_ref in &post.media_refs {
            let asset_id = match media_ref {
                MediaRef::Asset(id) => *id,
                MediaRef::VideoJob(job_id) => *outputs.get(job_id).ok_or_else(|| {
                    PublishError::MediaUnavailable(format!("Video job {} has no output", job_id))
                })?,
            };
            let resolved = self
                .ctx
                .library
                .resolve(asset_id)
                .await
                .map_err(|e| match e {
                    MediaError::NotFound(_) | MediaError::Empty(_) => {
                        PublishError::MediaUnavailable(e.to_string())
                    }
                    other => PublishError::NetworkError(format!(
                        "Media library unavailable: {}",
                        other
                    )),
                })?;
            media.push(resolved);
        }
        Ok(media)
    }

    async fn publish(
        &self,
        post: &Post,
        outputs: &HashMap<Uuid, Uuid>,
    ) -> Result<PublishReceipt, PublishError> {
        let media = self.resolve_media(post, outputs).await?;
        let publisher = self.ctx.publishers.get(post.platform).await?;

        self.ctx.rate_limiter.acquire(post.platform).await;

        if publisher.delivers_per_recipient() {
            // bounded per recipient by the adapter
            return publisher.publish(post, &media).await;
        }

        let timeout = self.ctx.config.publish_timeout();
        match tokio::time::timeout(timeout, publisher.publish(post, &media)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingPostStore, FakePublisher, Harness};
    use chrono::Duration;
    use postflow_core::models::{
        AssetMetadata, MediaKind, NewVideoJob, PipelineStage, Platform, ResolutionProfile,
        StageFailure,
    };
    use postflow_core::{PublishErrorKind, SchedulerConfig};
    use postflow_db::VideoJobStore;
    use std::sync::Arc;

    fn network_error() -> PublishError {
        PublishError::NetworkError("connection reset".to_string())
    }

    fn new_job(images: Vec<Uuid>) -> NewVideoJob {
        NewVideoJob {
            topic: "spring sale".to_string(),
            tone: "upbeat".to_string(),
            target_lines: 3,
            voice: "nova".to_string(),
            profile: ResolutionProfile::Square,
            image_refs: images,
        }
    }

    #[tokio::test]
    async fn post_due_a_second_ago_is_published_in_the_tick() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Launch day"),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.total(), 1);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.remote_id.as_deref(), Some("remote-1"));
        assert!(stored.published_at.is_some());
        assert_eq!(h.publisher.calls(), 1);
    }

    #[tokio::test]
    async fn future_post_is_not_due() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        h.scheduled_post(
            NewPost::new(Platform::LinkedIn, "Later"),
            now + Duration::seconds(120),
        )
        .await;

        let due: Vec<Post> = h.scheduler.poll_due(now).try_collect().await.unwrap();
        assert!(due.is_empty());

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(h.publisher.calls(), 0);
    }

    #[tokio::test]
    async fn poll_due_pages_through_posts_oldest_first() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let mut expected = Vec::new();
        for offset in [30, 50, 10, 40, 20] {
            let post = h
                .scheduled_post(
                    NewPost::new(Platform::LinkedIn, format!("post {}", offset)),
                    now - Duration::seconds(offset),
                )
                .await;
            expected.push((offset, post.id));
        }
        expected.sort_by(|a, b| b.0.cmp(&a.0));

        // The harness pages two posts at a time.
        let due: Vec<Post> = h.scheduler.poll_due(now).try_collect().await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|p| p.id).collect();
        let expected: Vec<Uuid> = expected.into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn three_network_errors_exhaust_three_attempts() {
        let publisher = FakePublisher::new(Platform::LinkedIn).responding(vec![
            Err(network_error()),
            Err(network_error()),
            Err(network_error()),
        ]);
        let h = Harness::new(publisher).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Flaky network").with_max_retries(3),
                now - Duration::seconds(1),
            )
            .await;

        let mut clock = now;
        for _ in 0..2 {
            let report = h.scheduler.tick(clock).await.unwrap();
            assert_eq!(report.rescheduled, 1);

            let stored = h.post(post.id).await;
            assert_eq!(stored.status, PostStatus::Scheduled);
            let backoff_until = stored.backoff_until.unwrap();
            assert!(backoff_until > clock);

            // Not due again until the backoff elapses.
            assert_eq!(h.scheduler.tick(clock).await.unwrap().total(), 0);
            clock = backoff_until;
        }

        let report = h.scheduler.tick(clock).await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        let failure = stored.last_error.unwrap();
        assert_eq!(failure.kind, PublishErrorKind::NetworkError);
        assert_eq!(failure.platform, Platform::LinkedIn);
        assert_eq!(h.publisher.calls(), 3);

        // Failed is terminal.
        let later = clock + Duration::days(1);
        assert_eq!(h.scheduler.tick(later).await.unwrap().total(), 0);
        assert_eq!(h.post(post.id).await.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn rejection_fails_without_retry() {
        let publisher = FakePublisher::new(Platform::Instagram).responding(vec![Err(
            PublishError::rejected(Some(400), serde_json::json!({"error": "caption too long"})),
        )]);
        let h = Harness::new(publisher).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::Instagram, "Too long"),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.failed, 1);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        let failure = stored.last_error.unwrap();
        assert_eq!(failure.kind, PublishErrorKind::PlatformRejected);
        assert!(failure.message.contains("caption too long"));
    }

    #[tokio::test]
    async fn retry_after_hint_postpones_backoff() {
        let publisher = FakePublisher::new(Platform::LinkedIn).responding(vec![Err(
            PublishError::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(7200)),
                message: "quota".to_string(),
            },
        )]);
        let h = Harness::new(publisher).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Busy"),
                now - Duration::seconds(1),
            )
            .await;

        h.scheduler.tick(now).await.unwrap();

        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Scheduled);
        assert!(stored.backoff_until.unwrap() >= now + Duration::seconds(7200));
        assert_eq!(
            stored.last_error.unwrap().kind,
            PublishErrorKind::RateLimited
        );
    }

    #[tokio::test]
    async fn slow_publish_times_out_and_is_retried() {
        let publisher = FakePublisher::new(Platform::WordPress)
            .with_delay(std::time::Duration::from_secs(5));
        let h = Harness::new(publisher).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::WordPress, "Slow blog"),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.rescheduled, 1);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Scheduled);
        assert_eq!(stored.last_error.unwrap().kind, PublishErrorKind::Timeout);
    }

    #[tokio::test]
    async fn per_recipient_adapter_is_not_cut_off_by_the_batch_timeout() {
        let publisher = FakePublisher::new(Platform::Email)
            .with_delay(std::time::Duration::from_millis(1500))
            .per_recipient();
        let h = Harness::new(publisher).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::Email, "Newsletter")
                    .with_recipients(vec!["a@example.com".into()]),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(h.post(post.id).await.status, PostStatus::Published);
        assert_eq!(h.publisher.calls(), 1);
    }

    #[tokio::test]
    async fn slow_email_batch_reaches_each_recipient_once() {
        use mockito::Matcher;
        use postflow_core::models::PlatformCredential;
        use postflow_db::CredentialStore;
        use postflow_publishers::{GraphMailOptions, GraphMailPublisher};

        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let ctx = h.scheduler.context();
        ctx.credentials
            .upsert_credential(PlatformCredential::new(
                Platform::Email,
                serde_json::json!({"tenant_id": "tenant-1", "client_id": "cid", "client_secret": "cs"}),
            ))
            .await
            .unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_body(r#"{"access_token":"graph-token","expires_in":3599}"#)
            .create_async()
            .await;
        let mut sends = Vec::new();
        for address in ["a@example.com", "b@example.com", "c@example.com"] {
            let send = server
                .mock("POST", Matcher::Regex(r"/sendMail$".to_string()))
                .match_body(Matcher::PartialJson(serde_json::json!({
                    "message": {"toRecipients": [{"emailAddress": {"address": address}}]}
                })))
                .with_status(202)
                .expect(1)
                .create_async()
                .await;
            sends.push(send);
        }

        let mut options = GraphMailOptions::new("news@example.com");
        options.graph_base_url = server.url();
        options.login_base_url = server.url();
        options.send_delay = std::time::Duration::from_millis(700);
        let email = GraphMailPublisher::new(ctx.credentials.clone(), ctx.library.clone(), options)
            .unwrap();
        ctx.publishers.register(Arc::new(email)).await;

        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::Email, "Monthly newsletter\nAll the news").with_recipients(
                    vec![
                        "a@example.com".into(),
                        "b@example.com".into(),
                        "c@example.com".into(),
                    ],
                ),
                now - Duration::seconds(1),
            )
            .await;

        for i in 0..3 {
            h.scheduler.tick(now + Duration::seconds(i * 120)).await.unwrap();
        }

        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.retry_count, 0);
        for send in sends {
            send.assert_async().await;
        }
    }

    #[tokio::test]
    async fn post_stuck_publishing_is_failed_and_not_republished() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Interrupted"),
                now - Duration::seconds(1),
            )
            .await;
        h.scheduler.claim(post.id, post.version).await.unwrap();

        let report = h.scheduler.tick(now + Duration::hours(2)).await.unwrap();

        assert_eq!(report.abandoned, 1);
        assert_eq!(report.published, 0);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.backoff_until, None);
        assert_eq!(
            stored.last_error.unwrap().kind,
            PublishErrorKind::ManualInterventionRequired
        );

        let report = h.scheduler.tick(now + Duration::hours(3)).await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(h.publisher.calls(), 0);
    }

    #[tokio::test]
    async fn recent_claim_is_left_publishing() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "In flight"),
                now - Duration::seconds(1),
            )
            .await;
        h.scheduler.claim(post.id, post.version).await.unwrap();

        let failed = h.scheduler.fail_stuck(now + Duration::minutes(10)).await.unwrap();

        assert!(failed.is_empty());
        assert_eq!(h.post(post.id).await.status, PostStatus::Publishing);
    }

    #[tokio::test]
    async fn post_waits_for_its_video() {
        let h = Harness::new(FakePublisher::new(Platform::Instagram)).await;
        let now = Utc::now();
        let image = h.image().await;
        let mut job = h.jobs.create_job(new_job(vec![image])).await.unwrap();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::Instagram, "Reel").with_media(MediaRef::VideoJob(job.id)),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.skipped, 1);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Scheduled);
        assert_eq!(stored.version, post.version);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(h.publisher.calls(), 0);

        let video = h
            .library
            .register_asset(
                b"rendered mp4",
                MediaKind::Video,
                AssetMetadata::default().with_filename("reel.mp4"),
            )
            .await
            .unwrap();
        job.stage = VideoStage::Complete;
        job.output_asset_id = Some(video);
        let version = job.version;
        h.jobs.save(&job, version).await.unwrap();

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(h.publisher.media_seen().await, vec![vec![video]]);
    }

    #[tokio::test]
    async fn failed_video_fails_the_post() {
        let h = Harness::new(FakePublisher::new(Platform::Instagram)).await;
        let now = Utc::now();
        let mut job = h.jobs.create_job(new_job(vec![h.image().await])).await.unwrap();
        job.stage = VideoStage::Failed;
        job.failure = Some(StageFailure {
            stage: PipelineStage::Speech,
            reason: "voice 'bob' is not in the catalog".to_string(),
        });
        let version = job.version;
        h.jobs.save(&job, version).await.unwrap();

        let post = h
            .scheduled_post(
                NewPost::new(Platform::Instagram, "Reel").with_media(MediaRef::VideoJob(job.id)),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(h.publisher.calls(), 0);
        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        let failure = stored.last_error.unwrap();
        assert_eq!(failure.kind, PublishErrorKind::MediaUnavailable);
        assert!(failure.message.contains("speech"));
    }

    #[tokio::test]
    async fn unknown_asset_fails_the_post() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Missing image")
                    .with_media(MediaRef::Asset(Uuid::new_v4())),
                now - Duration::seconds(1),
            )
            .await;

        h.scheduler.tick(now).await.unwrap();

        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(
            stored.last_error.unwrap().kind,
            PublishErrorKind::MediaUnavailable
        );
        assert_eq!(h.publisher.calls(), 0);
    }

    #[tokio::test]
    async fn resolved_assets_reach_the_publisher_in_order() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let first = h.image().await;
        let second = h
            .library
            .register_asset(
                b"second image",
                MediaKind::Image,
                AssetMetadata::default().with_filename("second.jpg"),
            )
            .await
            .unwrap();
        h.scheduled_post(
            NewPost::new(Platform::LinkedIn, "Gallery")
                .with_media(MediaRef::Asset(second))
                .with_media(MediaRef::Asset(first)),
            now - Duration::seconds(1),
        )
        .await;

        h.scheduler.tick(now).await.unwrap();

        assert_eq!(h.publisher.media_seen().await, vec![vec![second, first]]);
    }

    #[tokio::test]
    async fn unregistered_platform_is_misconfigured() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::Email, "Newsletter")
                    .with_recipients(vec!["a@example.com".to_string()]),
                now - Duration::seconds(1),
            )
            .await;

        h.scheduler.tick(now).await.unwrap();

        let stored = h.post(post.id).await;
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(
            stored.last_error.unwrap().kind,
            PublishErrorKind::Misconfigured
        );
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Race"),
                now - Duration::seconds(1),
            )
            .await;

        let (a, b) = tokio::join!(
            h.scheduler.claim(post.id, post.version),
            h.scheduler.claim(post.id, post.version)
        );

        assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, SchedulerError::ClaimConflict { .. }));
        assert_eq!(h.post(post.id).await.status, PostStatus::Publishing);
    }

    #[tokio::test]
    async fn claimed_post_is_not_due() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Taken"),
                now - Duration::seconds(1),
            )
            .await;
        h.scheduler.claim(post.id, post.version).await.unwrap();

        let report = h.scheduler.tick(now).await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(h.publisher.calls(), 0);
    }

    #[tokio::test]
    async fn record_success_is_idempotent() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Once"),
                now - Duration::seconds(1),
            )
            .await;
        h.scheduler.claim(post.id, post.version).await.unwrap();

        let first = h.scheduler.record_success(post.id, "urn:li:share:1").await.unwrap();
        let second = h.scheduler.record_success(post.id, "urn:li:share:1").await.unwrap();

        assert_eq!(first.unwrap().version, second.unwrap().version);
        assert_eq!(
            h.post(post.id).await.remote_id.as_deref(),
            Some("urn:li:share:1")
        );
    }

    #[tokio::test]
    async fn delete_on_publish_removes_the_post() {
        let config = SchedulerConfig {
            delete_on_publish: true,
            ..Harness::config()
        };
        let h = Harness::with_config(FakePublisher::new(Platform::LinkedIn), config).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Ephemeral"),
                now - Duration::seconds(1),
            )
            .await;

        let report = h.scheduler.tick(now).await.unwrap();

        assert_eq!(report.published, 1);
        assert!(h.scheduler.get_post(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_returns_post_to_draft_once() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "Maybe"),
                now + Duration::hours(1),
            )
            .await;

        let cancelled = h.scheduler.cancel(post.id).await.unwrap();
        assert_eq!(cancelled.status, PostStatus::Draft);
        assert!(matches!(
            h.scheduler.cancel(post.id).await,
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn schedule_rejects_past_times() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let now = Utc::now();
        let post = h
            .scheduler
            .create_post(NewPost::new(Platform::LinkedIn, "Draft"))
            .await
            .unwrap();

        let err = h
            .scheduler
            .schedule(post.id, now - Duration::seconds(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert_eq!(h.post(post.id).await.status, PostStatus::Draft);
    }

    #[tokio::test]
    async fn store_failure_aborts_the_tick() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let ctx = SchedulerContext {
            posts: Arc::new(FailingPostStore),
            ..h.scheduler.context().clone()
        };
        let scheduler = Scheduler::new(ctx);

        let err = scheduler.tick(Utc::now()).await.unwrap_err();
        assert!(err.is_store_failure());
    }
}
