//! Retry backoff shared by the scheduler and the video pipeline.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 3600;

/// Exponential backoff with a cap and equal jitter.
///
/// Attempt `n` waits between half and all of `min(cap, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            cap: Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    /// Upper bound of the delay before attempt `retry_count + 1`.
    pub fn ceiling(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(retry_count).as_millis() as u64;
        let half = ceiling / 2;
        Duration::from_millis(half + rng.random_range(0..=ceiling - half))
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        self.delay_with(retry_count, &mut rand::rng())
    }

    /// When the next attempt may start, never earlier than a platform's retry-after hint.
    pub fn next_attempt_at(
        &self,
        now: DateTime<Utc>,
        retry_count: u32,
        retry_after: Option<Duration>,
    ) -> DateTime<Utc> {
        let delay = self.delay(retry_count).max(retry_after.unwrap_or_default());
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(now)
    }
}
