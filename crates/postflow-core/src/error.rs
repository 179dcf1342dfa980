//! Error types module
//!
//! Typed errors shared across postflow components. `PublishError` is the taxonomy
//! every platform adapter reports in; `SchedulerError` covers the post lifecycle
//! operations and the stores behind them.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::models::PostStatus;

/// Machine-readable category of a publish failure, persisted with the post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PublishErrorKind {
    AuthExpired,
    RateLimited,
    MediaUnsupported,
    NetworkError,
    PlatformRejected,
    ManualInterventionRequired,
    Misconfigured,
    MediaUnavailable,
    Timeout,
}

impl Display for PublishErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            PublishErrorKind::AuthExpired => "AuthExpired",
            PublishErrorKind::RateLimited => "RateLimited",
            PublishErrorKind::MediaUnsupported => "MediaUnsupported",
            PublishErrorKind::NetworkError => "NetworkError",
            PublishErrorKind::PlatformRejected => "PlatformRejected",
            PublishErrorKind::ManualInterventionRequired => "ManualInterventionRequired",
            PublishErrorKind::Misconfigured => "Misconfigured",
            PublishErrorKind::MediaUnavailable => "MediaUnavailable",
            PublishErrorKind::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Media unsupported: {0}")]
    MediaUnsupported(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rejected by platform{}: {diagnostic}", status_suffix(.status))]
    PlatformRejected {
        status: Option<u16>,
        diagnostic: serde_json::Value,
    },

    #[error("Manual intervention required: {0}")]
    ManualInterventionRequired(String),

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Publish timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl PublishError {
    pub fn kind(&self) -> PublishErrorKind {
        match self {
            PublishError::AuthExpired(_) => PublishErrorKind::AuthExpired,
            PublishError::RateLimited { .. } => PublishErrorKind::RateLimited,
            PublishError::MediaUnsupported(_) => PublishErrorKind::MediaUnsupported,
            PublishError::NetworkError(_) => PublishErrorKind::NetworkError,
            PublishError::PlatformRejected { .. } => PublishErrorKind::PlatformRejected,
            PublishError::ManualInterventionRequired(_) => {
                PublishErrorKind::ManualInterventionRequired
            }
            PublishError::Misconfigured(_) => PublishErrorKind::Misconfigured,
            PublishError::MediaUnavailable(_) => PublishErrorKind::MediaUnavailable,
            PublishError::Timeout(_) => PublishErrorKind::Timeout,
        }
    }

    /// Transient failures are retried with backoff; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::AuthExpired(_)
                | PublishError::RateLimited { .. }
                | PublishError::NetworkError(_)
                | PublishError::Timeout(_)
        )
    }

    /// Minimum delay the platform asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rejected(status: Option<u16>, diagnostic: impl Into<serde_json::Value>) -> Self {
        PublishError::PlatformRejected {
            status,
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Post {post_id} was already claimed (expected version {expected_version})")]
    ClaimConflict { post_id: Uuid, expected_version: i64 },

    #[error("Post {post_id} cannot be {action} while {status}")]
    InvalidTransition {
        post_id: Uuid,
        status: PostStatus,
        action: &'static str,
    },

    #[error("Post not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for SchedulerError {
    fn from(err: SqlxError) -> Self {
        SchedulerError::Database(err)
    }
}

impl SchedulerError {
    /// Errors that say nothing about the post itself, only about the store.
    pub fn is_store_failure(&self) -> bool {
        match self {
            SchedulerError::Store(_) => true,
            #[cfg(feature = "sqlx")]
            SchedulerError::Database(_) => true,
            _ => false,
        }
    }
}
