//! Postflow Core Library
//!
//! Domain models, error types, configuration and retry policy shared by every
//! postflow component.

pub mod backoff;
pub mod config;
pub mod error;
pub mod models;
pub mod stage_error;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use config::{
    Config, GraphMailSettings, InstagramSettings, LinkedInSettings, PipelineConfig,
    PlatformSettings, SchedulerConfig, StorageConfig, WhatsAppSettings, WordPressSettings,
};
pub use error::{PublishError, PublishErrorKind, SchedulerError};
pub use stage_error::{StageError, StageResultExt};
