//! Per-platform rate limiting
//!
//! A token bucket per platform keeps the worker from bursting more calls at a
//! platform than it tolerates, independently of the platform's own 429s.

pub use limiter::RateLimiter;

mod limiter;
