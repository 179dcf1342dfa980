use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use postflow_core::models::{NewVideoJob, VideoJob};

use crate::traits::{StoreError, VideoJobStore};

const JOB_COLUMNS: &str = r#"
    id, topic, tone, target_lines, voice, profile, image_refs, stage, script,
    audio_asset_id, audio_duration_ms, output_asset_id, stage_attempts, failure,
    last_error, next_attempt_at, locked_until, version, created_at, updated_at
"#;

const RUNNABLE: &str = r#"
    stage IN ('pending_script', 'pending_tts', 'pending_assembly')
    AND (locked_until IS NULL OR locked_until <= $1)
    AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
"#;

#[derive(Clone)]
pub struct VideoJobRepository {
    pool: PgPool,
}

impl VideoJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<serde_json::Value>, StoreError> {
    value
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::Other(e.into()))
}

#[async_trait]
impl VideoJobStore for VideoJobRepository {
    #[tracing::instrument(skip(self, job))]
    async fn create_job(&self, job: NewVideoJob) -> Result<VideoJob, StoreError> {
        let job = job.into_job(Utc::now());

        let created = sqlx::query_as::<Postgres, VideoJob>(&format!(
            r#"
            INSERT INTO video_jobs (
                id, topic, tone, target_lines, voice, profile, image_refs, stage,
                stage_attempts, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, $9, $9)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(&job.topic)
        .bind(&job.tone)
        .bind(job.target_lines)
        .bind(&job.voice)
        .bind(job.profile.to_string())
        .bind(&job.image_refs)
        .bind(job.stage.to_string())
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id = %created.id, "Video job created");
        Ok(created)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        let job = sqlx::query_as::<Postgres, VideoJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn acquire(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<VideoJob>, StoreError> {
        let job = sqlx::query_as::<Postgres, VideoJob>(&format!(
            r#"
            UPDATE video_jobs
            SET locked_until = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $3 AND {RUNNABLE}
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(lease_until)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if job.is_none() && self.get_job(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }

        Ok(job)
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, stage = %job.stage))]
    async fn save(&self, job: &VideoJob, expected_version: i64) -> Result<VideoJob, StoreError> {
        let saved = sqlx::query_as::<Postgres, VideoJob>(&format!(
            r#"
            UPDATE video_jobs
            SET stage = $3,
                script = $4,
                audio_asset_id = $5,
                audio_duration_ms = $6,
                output_asset_id = $7,
                stage_attempts = $8,
                failure = $9,
                last_error = $10,
                next_attempt_at = $11,
                locked_until = $12,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(expected_version)
        .bind(job.stage.to_string())
        .bind(to_json(&job.script)?)
        .bind(job.audio_asset_id)
        .bind(job.audio_duration_ms.map(|ms| ms as i64))
        .bind(job.output_asset_id)
        .bind(job.stage_attempts)
        .bind(to_json(&job.failure)?)
        .bind(&job.last_error)
        .bind(job.next_attempt_at)
        .bind(job.locked_until)
        .fetch_optional(&self.pool)
        .await?;

        match saved {
            Some(saved) => Ok(saved),
            None if self.get_job(job.id).await?.is_none() => Err(StoreError::NotFound(job.id)),
            None => Err(StoreError::Conflict {
                id: job.id,
                expected_version,
            }),
        }
    }

    async fn list_runnable(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM video_jobs WHERE {RUNNABLE} ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
