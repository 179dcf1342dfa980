//! Drives video jobs through their stages
//!
//! One call to [`PipelineRunner::step`] runs exactly one stage of one job:
//! acquire the job's lease, run the stage handler under the stage timeout and
//! save the outcome with the version the lease returned. Success advances the
//! stage. A recoverable failure schedules another attempt with backoff until the
//! attempt ceiling, after which the job fails. A terminal failure fails the job
//! at once.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use postflow_core::models::{NewVideoJob, PipelineStage, StageFailure, VideoJob, VideoStage};
use postflow_core::{BackoffPolicy, PipelineConfig, StageError};
use postflow_db::{StoreError, VideoJobStore};

use crate::stages::StageHandlers;

/// Extra lease time beyond the stage timeout, so a lease never expires mid-stage.
const LEASE_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_stage_attempts: i32,
    pub script_timeout: Duration,
    pub speech_timeout: Duration,
    pub assembly_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_stage_attempts: config.max_stage_attempts.max(1),
            script_timeout: Duration::from_secs(config.script_timeout_secs),
            speech_timeout: Duration::from_secs(config.speech_timeout_secs),
            assembly_timeout: Duration::from_secs(config.assembly_timeout_secs),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn timeout(&self, stage: PipelineStage) -> Duration {
        match stage {
            PipelineStage::Script => self.script_timeout,
            PipelineStage::Speech => self.speech_timeout,
            PipelineStage::Assembly => self.assembly_timeout,
        }
    }
}

pub struct PipelineRunner {
    store: Arc<dyn VideoJobStore>,
    handlers: StageHandlers,
    settings: RunnerSettings,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn VideoJobStore>,
        handlers: StageHandlers,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            handlers,
            settings,
        }
    }

    pub async fn create_job(&self, job: NewVideoJob) -> anyhow::Result<VideoJob> {
        if job.topic.trim().is_empty() {
            anyhow::bail!("A video job needs a topic");
        }
        if job.image_refs.is_empty() {
            anyhow::bail!("A video job needs at least one image");
        }
        let job = self
            .store
            .create_job(job)
            .await
            .context("Failed to create video job")?;
        tracing::info!(job_id = %job.id, images = job.image_refs.len(), "Video job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        self.store.get_job(id).await
    }

    /// Run the pending stage of job `id` if it is runnable now.
    pub async fn step(&self, id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        self.step_at(id, Utc::now()).await
    }

    /// Run the pending stage of job `id` as of `now`. `None` when nothing ran.
    #[tracing::instrument(skip(self), fields(job_id = %id))]
    pub async fn step_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<VideoJob>, StoreError> {
        let stored = self.store.get_job(id).await?.ok_or(StoreError::NotFound(id))?;
        let Some(stage) = stored.stage.pending() else {
            return Ok(None);
        };

        let timeout = self.settings.timeout(stage);
        let lease_until = now + to_chrono(timeout + LEASE_MARGIN);
        let Some(acquired) = self.store.acquire(id, now, lease_until).await? else {
            tracing::debug!("Job not runnable, skipping");
            return Ok(None);
        };
        let Some(handler) = self.handlers.get(stage) else {
            let outcome = Err(StageError::terminal(anyhow::anyhow!(
                "No handler registered for stage {}",
                stage
            )));
            let next = self.apply_outcome(acquired.clone(), acquired.clone(), stage, outcome, now);
            return self.store.save(&next, acquired.version).await.map(Some);
        };

        tracing::info!(stage = %stage, attempt = acquired.stage_attempts + 1, "Running stage");
        let mut working = acquired.clone();
        let outcome = match tokio::time::timeout(timeout, handler.run(&mut working)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::recoverable(anyhow::anyhow!(
                "Stage {} timed out after {}s",
                stage,
                timeout.as_secs()
            ))),
        };

        let next = self.apply_outcome(acquired.clone(), working, stage, outcome, now);
        let saved = self.store.save(&next, acquired.version).await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to persist stage outcome");
            e
        })?;
        Ok(Some(saved))
    }

    /// The job to persist after `stage` ran on `acquired` and produced `worked`.
    fn apply_outcome(
        &self,
        acquired: VideoJob,
        worked: VideoJob,
        stage: PipelineStage,
        outcome: Result<(), StageError>,
        now: DateTime<Utc>,
    ) -> VideoJob {
        match outcome {
            Ok(()) => {
                let mut job = worked;
                job.stage = stage.completed();
                job.stage_attempts = 0;
                job.last_error = None;
                job.next_attempt_at = None;
                job.locked_until = None;
                tracing::info!(job_id = %job.id, stage = %stage, next = %job.stage, "Stage complete");
                job
            }
            Err(err) => {
                // Outputs of a failed run are discarded.
                let mut job = acquired;
                let reason = err.to_string();
                job.stage_attempts += 1;
                job.last_error = Some(format!("{}: {}", stage, reason));
                job.locked_until = None;

                let exhausted = job.stage_attempts >= self.settings.max_stage_attempts;
                if err.is_recoverable() && !exhausted {
                    let retry = (job.stage_attempts - 1).max(0) as u32;
                    job.next_attempt_at = Some(self.settings.backoff.next_attempt_at(now, retry, None));
                    tracing::warn!(
                        job_id = %job.id,
                        stage = %stage,
                        attempts = job.stage_attempts,
                        max_attempts = self.settings.max_stage_attempts,
                        error = %reason,
                        "Stage failed, will retry"
                    );
                } else {
                    job.stage = VideoStage::Failed;
                    job.next_attempt_at = None;
                    job.failure = Some(StageFailure { stage, reason: reason.clone() });
                    tracing::error!(
                        job_id = %job.id,
                        stage = %stage,
                        attempts = job.stage_attempts,
                        recoverable = err.is_recoverable(),
                        error = %reason,
                        "Video job failed"
                    );
                }
                job
            }
        }
    }

    /// Run stages back to back until the job completes, fails or has to wait.
    pub async fn run_until_blocked(&self, id: Uuid) -> Result<VideoJob, StoreError> {
        loop {
            match self.step(id).await? {
                Some(job) if job.stage.is_terminal() || job.next_attempt_at.is_some() => {
                    return Ok(job)
                }
                Some(_) => continue,
                None => {
                    return self.store.get_job(id).await?.ok_or(StoreError::NotFound(id));
                }
            }
        }
    }

    /// Put a failed job back on the stage it failed at. Earlier outputs are kept.
    pub async fn restart(&self, id: Uuid) -> anyhow::Result<VideoJob> {
        let mut job = self
            .store
            .get_job(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let version = job.version;
        let stage = job.restart()?;
        let job = self.store.save(&job, version).await?;
        tracing::info!(job_id = %id, stage = %stage, "Video job restarted");
        Ok(job)
    }

    /// One pass over runnable jobs; returns how many stages ran.
    pub async fn run_due(&self, now: DateTime<Utc>, limit: i64) -> Result<usize, StoreError> {
        let ids = self.store.list_runnable(now, limit).await?;
        let mut ran = 0;
        for id in ids {
            match self.step_at(id, now).await {
                Ok(Some(_)) => ran += 1,
                Ok(None) => {}
                Err(e) => tracing::error!(job_id = %id, error = %e, "Video job step failed"),
            }
        }
        Ok(ran)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
