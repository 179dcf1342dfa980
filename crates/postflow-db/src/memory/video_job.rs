use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use postflow_core::models::{NewVideoJob, VideoJob};

use crate::traits::{StoreError, VideoJobStore};

#[derive(Clone, Default)]
pub struct InMemoryVideoJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, VideoJob>>>,
}

impl InMemoryVideoJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoJobStore for InMemoryVideoJobStore {
    async fn create_job(&self, job: NewVideoJob) -> Result<VideoJob, StoreError> {
        let job = job.into_job(Utc::now());
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn acquire(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<VideoJob>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !job.is_runnable(now) {
            return Ok(None);
        }
        job.locked_until = Some(lease_until);
        job.version += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &VideoJob, expected_version: i64) -> Result<VideoJob, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let stored = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                id: job.id,
                expected_version,
            });
        }
        *stored = VideoJob {
            version: expected_version + 1,
            updated_at: Utc::now(),
            ..job.clone()
        };
        Ok(stored.clone())
    }

    async fn list_runnable(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut runnable: Vec<&VideoJob> = jobs.values().filter(|j| j.is_runnable(now)).collect();
        runnable.sort_by_key(|j| (j.created_at, j.id));
        Ok(runnable
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|j| j.id)
            .collect())
    }
}
