//! Publisher registry keyed by platform

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use postflow_core::models::Platform;
use postflow_core::PublishError;

use crate::publisher::Publisher;

/// Registry of the adapters configured for this process.
///
/// Registration happens at startup; lookups run concurrently from the scheduler
/// and the operator commands.
#[derive(Clone)]
pub struct PublisherRegistry {
    publishers: Arc<RwLock<HashMap<Platform, Arc<dyn Publisher>>>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self {
            publishers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an adapter, replacing any previous one for the same platform.
    pub async fn register(&self, publisher: Arc<dyn Publisher>) {
        let platform = publisher.platform();
        let previous = self.publishers.write().await.insert(platform, publisher);
        if previous.is_some() {
            tracing::warn!(platform = %platform, "Replaced registered publisher");
        } else {
            tracing::info!(platform = %platform, "Publisher registered");
        }
    }

    /// Adapter for `platform`, or `Misconfigured` when none is registered.
    pub async fn get(&self, platform: Platform) -> Result<Arc<dyn Publisher>, PublishError> {
        self.publishers
            .read()
            .await
            .get(&platform)
            .cloned()
            .ok_or_else(|| {
                PublishError::Misconfigured(format!("No publisher registered for {}", platform))
            })
    }

    pub async fn contains(&self, platform: Platform) -> bool {
        self.publishers.read().await.contains_key(&platform)
    }

    pub async fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.publishers.read().await.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }

    /// Ask every adapter to load its persisted state. Failures are logged and
    /// left for the first publish to surface.
    pub async fn rehydrate_all(&self) {
        let publishers: Vec<Arc<dyn Publisher>> =
            self.publishers.read().await.values().cloned().collect();

        for publisher in publishers {
            if let Err(e) = publisher.rehydrate().await {
                tracing::warn!(
                    platform = %publisher.platform(),
                    error = %e,
                    "Failed to rehydrate publisher state"
                );
            }
        }
    }
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
