//! Publisher capability shared by every platform adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use postflow_core::models::{Platform, Post};
use postflow_core::PublishError;
use postflow_media::ResolvedMedia;

use crate::constraints::MediaConstraints;

/// What a platform returned for a successful publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Platform-side identifier of the published item.
    pub remote_id: String,
    /// Adapter-specific details (permalink, delivery report, ...).
    pub details: serde_json::Value,
}

impl PublishReceipt {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipientFailure {
    pub recipient: String,
    pub error: String,
}

/// Per-recipient outcome for adapters that deliver one message per recipient.
///
/// A partially delivered post counts as published: retrying it would deliver
/// twice to everyone already in `delivered`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<RecipientFailure>,
}

impl DeliveryReport {
    pub fn record_failure(&mut self, recipient: impl Into<String>, error: &PublishError) {
        self.failed.push(RecipientFailure {
            recipient: recipient.into(),
            error: error.to_string(),
        });
    }

    pub fn total(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "delivered": self.delivered,
            "failed": self.failed,
            "total": self.total(),
        })
    }
}

/// A platform adapter.
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    fn platform(&self) -> Platform;

    /// Media this adapter accepts.
    fn constraints(&self) -> &MediaConstraints;

    /// Publish `post` with its already resolved media.
    async fn publish(
        &self,
        post: &Post,
        media: &[ResolvedMedia],
    ) -> Result<PublishReceipt, PublishError>;

    /// Whether the adapter sends one message per recipient.
    ///
    /// Such adapters bound each delivery with their own timeout and report a
    /// partial delivery as success. The scheduler puts no timeout around the
    /// whole batch for them.
    fn delivers_per_recipient(&self) -> bool {
        false
    }

    /// Load persisted state (sessions) before the first publish.
    async fn rehydrate(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Credential store failures are transient from the adapter's point of view.
pub(crate) fn store_error(e: anyhow::Error) -> PublishError {
    PublishError::NetworkError(format!("Credential store unavailable: {:#}", e))
}
