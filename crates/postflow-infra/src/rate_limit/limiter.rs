use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use postflow_core::models::Platform;

/// Seconds of traffic a full bucket may burst.
const BURST_WINDOW_SECS: f64 = 10.0;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(((1.0 - self.tokens) / self.refill_rate).max(0.0))
    }
}

/// Token buckets keyed by platform.
///
/// A non-positive rate disables limiting: every acquire succeeds at once.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<Platform, TokenBucket>>>,
    per_second: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(per_minute: f64) -> Self {
        let per_second = per_minute / 60.0;
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_second,
            capacity: (per_second * BURST_WINDOW_SECS).max(1.0),
        }
    }

    /// Override how many calls a platform may make back to back.
    pub fn with_burst(mut self, capacity: f64) -> Self {
        self.capacity = capacity.max(1.0);
        self
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    fn is_unlimited(&self) -> bool {
        self.per_second <= 0.0
    }

    fn initial_bucket(&self) -> TokenBucket {
        TokenBucket::new(self.capacity, self.per_second)
    }

    /// Wait until `platform` has a token, then take it.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, platform: Platform) {
        if self.is_unlimited() {
            return;
        }
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(platform)
                    .or_insert_with(|| self.initial_bucket());
                if bucket.try_acquire() {
                    tracing::trace!(
                        platform = %platform,
                        tokens_remaining = bucket.tokens,
                        "Rate limit token acquired"
                    );
                    return;
                }
                bucket.time_until_next_token()
            };

            if wait > Duration::ZERO {
                tracing::debug!(
                    platform = %platform,
                    wait_ms = wait.as_millis(),
                    "Platform rate limit reached, waiting for token"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, platform: Platform) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(platform)
            .or_insert_with(|| self.initial_bucket());
        let acquired = bucket.try_acquire();
        if !acquired {
            tracing::trace!(
                platform = %platform,
                tokens_remaining = bucket.tokens,
                "Rate limit token not available"
            );
        }
        acquired
    }

    pub async fn available_tokens(&self, platform: Platform) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(platform)
            .or_insert_with(|| self.initial_bucket());
        bucket.refill();
        bucket.tokens
    }
}
