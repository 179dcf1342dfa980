use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use postflow_core::models::{Platform, PlatformCredential};

use crate::traits::CredentialStore;

#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    credentials: Arc<Mutex<HashMap<Platform, PlatformCredential>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_credential(self, credential: PlatformCredential) -> Self {
        self.credentials
            .lock()
            .await
            .insert(credential.platform, credential);
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_credential(&self, platform: Platform) -> Result<Option<PlatformCredential>> {
        Ok(self.credentials.lock().await.get(&platform).cloned())
    }

    async fn upsert_credential(&self, credential: PlatformCredential) -> Result<()> {
        let mut credentials = self.credentials.lock().await;
        let session = credentials
            .get(&credential.platform)
            .and_then(|c| c.session.clone());
        credentials.insert(
            credential.platform,
            PlatformCredential {
                session: credential.session.clone().or(session),
                updated_at: Utc::now(),
                ..credential
            },
        );
        Ok(())
    }

    async fn put_session(&self, platform: Platform, session: serde_json::Value) -> Result<()> {
        let mut credentials = self.credentials.lock().await;
        let entry = credentials
            .entry(platform)
            .or_insert_with(|| PlatformCredential::new(platform, serde_json::json!({})));
        entry.session = Some(session);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_session(&self, platform: Platform) -> Result<()> {
        if let Some(entry) = self.credentials.lock().await.get_mut(&platform) {
            entry.session = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}
