use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use postflow_core::models::{MediaAsset, MediaKind};

use crate::traits::MediaAssetStore;

#[derive(Clone, Default)]
pub struct InMemoryMediaAssetStore {
    assets: Arc<Mutex<HashMap<Uuid, MediaAsset>>>,
}

impl InMemoryMediaAssetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaAssetStore for InMemoryMediaAssetStore {
    async fn insert_asset(&self, asset: MediaAsset) -> Result<MediaAsset> {
        let mut assets = self.assets.lock().await;
        if let Some(existing) = assets
            .values()
            .find(|a| a.content_hash == asset.content_hash && a.kind == asset.kind)
        {
            return Ok(existing.clone());
        }
        assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        Ok(self.assets.lock().await.get(&id).cloned())
    }

    async fn find_by_hash(&self, content_hash: &str, kind: MediaKind) -> Result<Option<MediaAsset>> {
        Ok(self
            .assets
            .lock()
            .await
            .values()
            .find(|a| a.content_hash == content_hash && a.kind == kind)
            .cloned())
    }
}
