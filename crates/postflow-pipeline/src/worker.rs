//! Background loop that advances runnable video jobs

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::runner::PipelineRunner;

const DEFAULT_BATCH_SIZE: i64 = 10;

pub struct PipelineWorker {
    runner: Arc<PipelineRunner>,
    poll_interval: Duration,
    batch_size: i64,
}

/// Stops a spawned [`PipelineWorker`].
pub struct PipelineWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl PipelineWorkerHandle {
    /// Ask the loop to stop and wait for the stage in flight to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Pipeline worker task panicked");
        }
    }
}

impl PipelineWorker {
    pub fn new(runner: Arc<PipelineRunner>, poll_interval: Duration) -> Self {
        Self {
            runner,
            poll_interval,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over runnable jobs.
    pub async fn tick(&self) -> usize {
        match self.runner.run_due(Utc::now(), self.batch_size).await {
            Ok(ran) => {
                if ran > 0 {
                    tracing::debug!(stages = ran, "Pipeline tick complete");
                }
                ran
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list runnable video jobs");
                0
            }
        }
    }

    pub fn spawn(self) -> PipelineWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = self.poll_interval.as_secs(),
                "Pipeline worker started"
            );
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Pipeline worker stopped");
        });
        PipelineWorkerHandle { shutdown_tx, join }
    }
}
