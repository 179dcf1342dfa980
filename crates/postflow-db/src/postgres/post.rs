use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use postflow_core::models::{MediaRef, NewPost, Post, PostFailure, PostStatus};
use postflow_core::{PublishErrorKind, SchedulerError};

use crate::traits::{DueCursor, PostStore};

const POST_COLUMNS: &str = r#"
    id,
    platform,
    title,
    body,
    media_refs,
    recipients,
    scheduled_at,
    backoff_until,
    status,
    retry_count,
    max_retries,
    last_error,
    remote_id,
    version,
    created_at,
    updated_at,
    published_at
"#;

#[derive(Clone)]
pub struct PostRepository {
    pool: PgPool,
}

impl PostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> Result<PostStatus, SchedulerError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .ok_or(SchedulerError::NotFound(id))?
            .parse()
            .map_err(SchedulerError::Store)
    }

    /// Turn a conditional update that matched no row into the right error.
    async fn transition_error(&self, id: Uuid, action: &'static str) -> SchedulerError {
        match self.current_status(id).await {
            Ok(status) => SchedulerError::InvalidTransition {
                post_id: id,
                status,
                action,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl PostStore for PostRepository {
    #[tracing::instrument(skip(self, post), fields(platform = %post.platform))]
    async fn create_post(
        &self,
        post: NewPost,
        default_max_retries: i32,
    ) -> Result<Post, SchedulerError> {
        let post = post.into_post(default_max_retries, Utc::now());
        let media_refs = serde_json::to_value(&post.media_refs)
            .map_err(|e| SchedulerError::Store(e.into()))?;

        let created = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            INSERT INTO posts (
                id, platform, title, body, media_refs, recipients, status,
                retry_count, max_retries, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'draft', 0, $7, 0, $8, $8)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(post.id)
        .bind(post.platform.as_str())
        .bind(&post.title)
        .bind(&post.body)
        .bind(media_refs)
        .bind(&post.recipients)
        .bind(post.max_retries)
        .bind(post.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, post_id = %post.id, "Failed to insert post");
            SchedulerError::Database(e)
        })?;

        tracing::info!(post_id = %created.id, platform = %created.platform, "Post created");

        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, SchedulerError> {
        let post = sqlx::query_as::<Postgres, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    #[tracing::instrument(skip(self))]
    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<Post, SchedulerError> {
        let post = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = 'scheduled',
                scheduled_at = $2,
                backoff_until = NULL,
                retry_count = 0,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match post {
            Some(post) => Ok(post),
            None => Err(self.transition_error(id, "scheduled").await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn query_due(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: i64,
    ) -> Result<Vec<Post>, SchedulerError> {
        let posts = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE status = 'scheduled'
              AND scheduled_at <= $1
              AND (backoff_until IS NULL OR backoff_until <= $1)
              AND ($2::timestamptz IS NULL OR (scheduled_at, id) > ($2, $3))
            ORDER BY scheduled_at ASC, id ASC
            LIMIT $4
            "#
        ))
        .bind(now)
        .bind(after.map(|c| c.scheduled_at))
        .bind(after.map(|c| c.id).unwrap_or_else(Uuid::nil))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to query due posts");
            SchedulerError::Database(e)
        })?;

        Ok(posts)
    }

    #[tracing::instrument(skip(self))]
    async fn claim(&self, id: Uuid, expected_version: i64) -> Result<Post, SchedulerError> {
        let post = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = 'publishing',
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled' AND version = $2
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match post {
            Some(post) => Ok(post),
            None => {
                // distinguish a lost race from an unknown id
                self.current_status(id).await?;
                Err(SchedulerError::ClaimConflict {
                    post_id: id,
                    expected_version,
                })
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn mark_success(
        &self,
        id: Uuid,
        remote_id: &str,
        delete: bool,
    ) -> Result<Option<Post>, SchedulerError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<Post> = sqlx::query_as::<Postgres, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = current.ok_or(SchedulerError::NotFound(id))?;
        match current.status {
            PostStatus::Published => {
                tx.commit().await?;
                return Ok(Some(current));
            }
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
            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(None);
        }

        let post = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = 'published',
                remote_id = $2,
                backoff_until = NULL,
                published_at = NOW(),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(remote_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(post))
    }

    #[tracing::instrument(skip(self, failure))]
    async fn mark_failure(
        &self,
        id: Uuid,
        failure: PostFailure,
        backoff_until: Option<DateTime<Utc>>,
    ) -> Result<Post, SchedulerError> {
        let failure = serde_json::to_value(&failure).map_err(|e| SchedulerError::Store(e.into()))?;

        let post = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = CASE WHEN $3::timestamptz IS NULL THEN 'failed' ELSE 'scheduled' END,
                backoff_until = $3,
                retry_count = retry_count + 1,
                last_error = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'publishing'
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(failure)
        .bind(backoff_until)
        .fetch_optional(&self.pool)
        .await?;

        match post {
            Some(post) => Ok(post),
            None => Err(self.transition_error(id, "marked failed").await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, id: Uuid) -> Result<Post, SchedulerError> {
        let post = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = 'draft',
                backoff_until = NULL,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match post {
            Some(post) => Ok(post),
            None => Err(self.transition_error(id, "cancelled").await),
        }
    }

    #[tracing::instrument(skip(self, message))]
    async fn fail_stuck_publishing(
        &self,
        claimed_before: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<Post>, SchedulerError> {
        let posts = sqlx::query_as::<Postgres, Post>(&format!(
            r#"
            UPDATE posts
            SET status = 'failed',
                backoff_until = NULL,
                retry_count = retry_count + 1,
                last_error = jsonb_build_object('kind', $2::text, 'platform', platform, 'message', $3::text),
                version = version + 1,
                updated_at = NOW()
            WHERE status = 'publishing' AND updated_at < $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(claimed_before)
        .bind(PublishErrorKind::ManualInterventionRequired.to_string())
        .bind(message)
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }

    async fn load_media_refs(&self, id: Uuid) -> Result<Vec<MediaRef>, SchedulerError> {
        let refs: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT media_refs FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let refs = refs.ok_or(SchedulerError::NotFound(id))?;
        serde_json::from_value(refs).map_err(|e| SchedulerError::Store(e.into()))
    }
}
