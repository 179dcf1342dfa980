use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use postflow_core::models::{MediaRef, NewPost, Post, PostFailure, PostStatus};
use postflow_core::{PublishErrorKind, SchedulerError};

use crate::traits::{DueCursor, PostStore};

/// Post store kept in process memory.
///
/// All transitions run under one lock, which gives `claim` the same
/// compare-and-swap guarantee the Postgres store gets from its conditional update.
#[derive(Clone, Default)]
pub struct InMemoryPostStore {
    posts: Arc<Mutex<HashMap<Uuid, Post>>>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a post as-is, bypassing the lifecycle checks.
    pub async fn insert(&self, post: Post) {
        self.posts.lock().await.insert(post.id, post);
    }

    pub async fn len(&self) -> usize {
        self.posts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.posts.lock().await.is_empty()
    }
}

fn bump(post: &mut Post) {
    post.version += 1;
    post.updated_at = Utc::now();
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn create_post(
        &self,
        post: NewPost,
        default_max_retries: i32,
    ) -> Result<Post, SchedulerError> {
        let post = post.into_post(default_max_retries, Utc::now());
        self.posts.lock().await.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, SchedulerError> {
        Ok(self.posts.lock().await.get(&id).cloned())
    }

    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<Post, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        if post.status != PostStatus::Draft {
            return Err(SchedulerError::InvalidTransition {
                post_id: id,
                status: post.status,
                action: "scheduled",
            });
        }
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(at);
        post.backoff_until = None;
        post.retry_count = 0;
        bump(post);
        Ok(post.clone())
    }

    async fn query_due(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: i64,
    ) -> Result<Vec<Post>, SchedulerError> {
        let posts = self.posts.lock().await;
        let mut due: Vec<Post> = posts
            .values()
            .filter(|p| p.is_due(now))
            .filter(|p| match (after, p.scheduled_at) {
                (Some(cursor), Some(at)) => (at, p.id) > (cursor.scheduled_at, cursor.id),
                _ => true,
            })
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.scheduled_at, p.id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim(&self, id: Uuid, expected_version: i64) -> Result<Post, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        if post.status != PostStatus::Scheduled || post.version != expected_version {
            return Err(SchedulerError::ClaimConflict {
                post_id: id,
                expected_version,
            });
        }
        post.status = PostStatus::Publishing;
        bump(post);
        Ok(post.clone())
    }

    async fn mark_success(
        &self,
        id: Uuid,
        remote_id: &str,
        delete: bool,
    ) -> Result<Option<Post>, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        match post.status {
            PostStatus::Published => return Ok(Some(post.clone())),
            PostStatus::Publishing => {}
            status => {
                return Err(SchedulerError::InvalidTransition {
                    post_id: id,
                    status,
                    action: "marked published",
                })
            }
        }

        if delete {
            posts.remove(&id);
            return Ok(None);
        }

        post.status = PostStatus::Published;
        post.remote_id = Some(remote_id.to_string());
        post.backoff_until = None;
        post.published_at = Some(Utc::now());
        bump(post);
        Ok(Some(post.clone()))
    }

    async fn mark_failure(
        &self,
        id: Uuid,
        failure: PostFailure,
        backoff_until: Option<DateTime<Utc>>,
    ) -> Result<Post, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        if post.status != PostStatus::Publishing {
            return Err(SchedulerError::InvalidTransition {
                post_id: id,
                status: post.status,
                action: "marked failed",
            });
        }
        post.status = if backoff_until.is_some() {
            PostStatus::Scheduled
        } else {
            PostStatus::Failed
        };
        post.backoff_until = backoff_until;
        post.retry_count += 1;
        post.last_error = Some(failure);
        bump(post);
        Ok(post.clone())
    }

    async fn cancel(&self, id: Uuid) -> Result<Post, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let post = posts.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        if post.status != PostStatus::Scheduled {
            return Err(SchedulerError::InvalidTransition {
                post_id: id,
                status: post.status,
                action: "cancelled",
            });
        }
        post.status = PostStatus::Draft;
        post.backoff_until = None;
        bump(post);
        Ok(post.clone())
    }

    async fn fail_stuck_publishing(
        &self,
        claimed_before: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<Post>, SchedulerError> {
        let mut posts = self.posts.lock().await;
        let mut failed = Vec::new();
        for post in posts.values_mut() {
            if post.status != PostStatus::Publishing || post.updated_at >= claimed_before {
                continue;
            }
            post.status = PostStatus::Failed;
            post.backoff_until = None;
            post.retry_count += 1;
            post.last_error = Some(PostFailure {
                kind: PublishErrorKind::ManualInterventionRequired,
                platform: post.platform,
                message: message.to_string(),
            });
            bump(post);
            failed.push(post.clone());
        }
        Ok(failed)
    }

    async fn load_media_refs(&self, id: Uuid) -> Result<Vec<MediaRef>, SchedulerError> {
        self.posts
            .lock()
            .await
            .get(&id)
            .map(|p| p.media_refs.clone())
            .ok_or(SchedulerError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use postflow_core::models::Platform;

    async fn scheduled_post(store: &InMemoryPostStore, at: DateTime<Utc>) -> Post {
        let post = store
            .create_post(NewPost::new(Platform::LinkedIn, "Quarterly update"), 3)
            .await
            .unwrap();
        store.schedule(post.id, at).await.unwrap()
    }

    fn failure() -> PostFailure {
        PostFailure {
            kind: PublishErrorKind::NetworkError,
            platform: Platform::LinkedIn,
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = InMemoryPostStore::new();
        let now = Utc::now();
        let post = scheduled_post(&store, now - Duration::seconds(1)).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let (id, version) = (post.id, post.version);
                tokio::spawn(async move { store.claim(id, version).await })
            })
            .collect();

        let mut won = 0;
        let mut conflicts = 0;
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                Ok(claimed) => {
                    won += 1;
                    assert_eq!(claimed.status, PostStatus::Publishing);
                }
                Err(SchedulerError::ClaimConflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 15);
    }

    #[tokio::test]
    async fn due_posts_are_oldest_first_and_paged() {
        let store = InMemoryPostStore::new();
        let now = Utc::now();
        let late = scheduled_post(&store, now - Duration::seconds(10)).await;
        let early = scheduled_post(&store, now - Duration::seconds(300)).await;
        let _future = scheduled_post(&store, now + Duration::seconds(120)).await;

        let first = store.query_due(now, None, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, early.id);

        let rest = store
            .query_due(now, DueCursor::after(&first[0]), 10)
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|p| p.id).collect::<Vec<_>>(), vec![late.id]);
    }

    #[tokio::test]
    async fn failed_post_never_returns_to_scheduled() {
        let store = InMemoryPostStore::new();
        let post = scheduled_post(&store, Utc::now()).await;
        let claimed = store.claim(post.id, post.version).await.unwrap();

        let failed = store.mark_failure(claimed.id, failure(), None).await.unwrap();
        assert_eq!(failed.status, PostStatus::Failed);

        let again = store
            .mark_failure(post.id, failure(), Some(Utc::now()))
            .await;
        assert!(matches!(again, Err(SchedulerError::InvalidTransition { .. })));
        assert!(matches!(
            store.claim(post.id, failed.version).await,
            Err(SchedulerError::ClaimConflict { .. })
        ));
        assert!(matches!(
            store.schedule(post.id, Utc::now()).await,
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn stuck_publishing_posts_fail_without_retry() {
        let store = InMemoryPostStore::new();
        let stuck = scheduled_post(&store, Utc::now()).await;
        store.claim(stuck.id, stuck.version).await.unwrap();
        let waiting = scheduled_post(&store, Utc::now() + Duration::hours(1)).await;

        let none = store
            .fail_stuck_publishing(Utc::now() - Duration::hours(1), "abandoned")
            .await
            .unwrap();
        assert!(none.is_empty());

        let failed = store
            .fail_stuck_publishing(Utc::now() + Duration::seconds(1), "abandoned")
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, stuck.id);
        assert_eq!(failed[0].status, PostStatus::Failed);
        assert_eq!(failed[0].retry_count, 1);
        let error = failed[0].last_error.as_ref().unwrap();
        assert_eq!(error.kind, PublishErrorKind::ManualInterventionRequired);
        assert_eq!(error.platform, Platform::LinkedIn);
        assert_eq!(error.message, "abandoned");

        let untouched = store.get_post(waiting.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn success_is_idempotent() {
        let store = InMemoryPostStore::new();
        let post = scheduled_post(&store, Utc::now()).await;
        store.claim(post.id, post.version).await.unwrap();

        let first = store.mark_success(post.id, "urn:li:share:1", false).await.unwrap().unwrap();
        let second = store.mark_success(post.id, "urn:li:share:1", false).await.unwrap().unwrap();
        assert_eq!(first.status, PostStatus::Published);
        assert_eq!(first.version, second.version);
        assert_eq!(second.remote_id.as_deref(), Some("urn:li:share:1"));
    }

    #[tokio::test]
    async fn success_can_delete() {
        let store = InMemoryPostStore::new();
        let post = scheduled_post(&store, Utc::now()).await;
        store.claim(post.id, post.version).await.unwrap();

        assert!(store.mark_success(post.id, "42", true).await.unwrap().is_none());
        assert!(store.get_post(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_only_from_scheduled() {
        let store = InMemoryPostStore::new();
        let post = scheduled_post(&store, Utc::now() + Duration::hours(1)).await;

        let draft = store.cancel(post.id).await.unwrap();
        assert_eq!(draft.status, PostStatus::Draft);

        assert!(matches!(
            store.cancel(post.id).await,
            Err(SchedulerError::InvalidTransition {
                status: PostStatus::Draft,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn retryable_failure_reschedules_with_backoff() {
        let store = InMemoryPostStore::new();
        let now = Utc::now();
        let post = scheduled_post(&store, now - Duration::seconds(1)).await;
        store.claim(post.id, post.version).await.unwrap();

        let backoff = now + Duration::seconds(60);
        let retried = store.mark_failure(post.id, failure(), Some(backoff)).await.unwrap();
        assert_eq!(retried.status, PostStatus::Scheduled);
        assert_eq!(retried.retry_count, 1);
        assert!(store.query_due(now, None, 10).await.unwrap().is_empty());
        assert_eq!(store.query_due(backoff, None, 10).await.unwrap().len(), 1);
    }
}
