//! Fixed-interval scheduler loop

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::scheduler::{Scheduler, TickReport};

pub struct SchedulerWorker {
    scheduler: Arc<Scheduler>,
    poll_interval: Duration,
}

/// Stops a spawned [`SchedulerWorker`].
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the loop to stop. A publish in flight finishes or times out first.
    pub async fn shutdown(self) {
        tracing::info!("Initiating scheduler shutdown");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Scheduler task panicked");
        }
    }
}

impl SchedulerWorker {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let poll_interval = scheduler.context().config.poll_interval();
        Self {
            scheduler,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run one tick at the current time. A store failure is logged and ends the tick.
    pub async fn tick(&self) -> Option<TickReport> {
        match self.scheduler.tick(Utc::now()).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Scheduler tick aborted");
                None
            }
        }
    }

    /// Rehydrate publishers, then tick every `poll_interval` until shut down.
    /// Ticks never overlap; a tick that overruns the interval swallows the
    /// ticks it missed.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(async move {
            self.scheduler.rehydrate().await;
            tracing::info!(
                poll_interval_secs = self.poll_interval.as_secs(),
                "Scheduler started"
            );

            let period = self.poll_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("Scheduler stopped");
        });
        SchedulerHandle { shutdown_tx, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePublisher, Harness};
    use postflow_core::models::{NewPost, Platform, PostStatus};

    #[tokio::test]
    async fn spawned_worker_rehydrates_and_publishes() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let post = h
            .scheduled_post(
                NewPost::new(Platform::LinkedIn, "From the loop"),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await;

        let worker = SchedulerWorker::new(Arc::new(h.scheduler.clone()))
            .with_poll_interval(Duration::from_millis(10));
        let handle = worker.spawn();

        let mut status = PostStatus::Scheduled;
        for _ in 0..200 {
            status = h.post(post.id).await.status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(status, PostStatus::Published);
        assert_eq!(h.publisher.rehydrated(), 1);
        assert_eq!(h.publisher.calls(), 1);
    }

    #[tokio::test]
    async fn tick_reports_nothing_when_idle() {
        let h = Harness::new(FakePublisher::new(Platform::LinkedIn)).await;
        let worker = SchedulerWorker::new(Arc::new(h.scheduler.clone()));
        assert_eq!(worker.tick().await, Some(TickReport::default()));
    }
}
