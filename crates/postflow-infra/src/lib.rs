//! Postflow Infrastructure Library
//!
//! Shared runtime plumbing for the postflow binaries:
//! - Telemetry initialization (tracing subscriber)
//! - Per-platform rate limiting

#[cfg(feature = "telemetry")]
pub mod telemetry;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

#[cfg(feature = "telemetry")]
pub use telemetry::{init_telemetry, LogFormat};

#[cfg(feature = "rate-limit")]
pub use rate_limit::RateLimiter;
