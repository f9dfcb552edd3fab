use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;

use crate::cache::{CoordinationStore, Expiry};
use crate::errors::MeteringError;
use crate::metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Calls allowed per window, per bucket.
    pub max_calls: u64,
    pub window_secs: u64,
    /// Longest wait a caller will block for before giving up with
    /// `RateLimitExceeded`.
    pub max_wait: Duration,
    /// Consecutive waits allowed for one acquisition.
    pub max_waits: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window_secs: 60,
            max_wait: Duration::from_secs(90),
            max_waits: 3,
        }
    }
}

/// Answer to a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clearance {
    pub granted: bool,
    /// Seconds until the window resets; 0 when granted.
    pub wait_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub bucket_name: String,
    pub remaining_calls: u64,
    pub window_reset_at: DateTime<Utc>,
}

/// Fixed-window call budget per named bucket.
///
/// The counter lives in the [`CoordinationStore`], so every process and every
/// tenant hitting the same bucket draws from one budget.
#[derive(Clone)]
pub struct RateLimiter {
    store: CoordinationStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: CoordinationStore, config: RateLimitConfig) -> Self {
        if !store.is_shared() {
            tracing::warn!("rate limiter is process-local; other instances are not accounted for");
        }
        Self { store, config }
    }

    fn key(bucket: &str) -> String {
        format!("ratelimit:{}", bucket)
    }

    /// Reserve one call from `bucket`.
    pub async fn acquire(&self, bucket: &str) -> Clearance {
        let counter = self
            .store
            .increment(&Self::key(bucket), self.config.window_secs, Expiry::Window)
            .await;

        if counter.value <= self.config.max_calls {
            Clearance {
                granted: true,
                wait_seconds: 0,
            }
        } else {
            Clearance {
                granted: false,
                wait_seconds: counter.ttl_secs.max(1),
            }
        }
    }

    pub async fn state(&self, bucket: &str) -> RateLimitState {
        let now = Utc::now();
        let (remaining_calls, ttl) = match self.store.counter(&Self::key(bucket)).await {
            Some(c) => (self.config.max_calls.saturating_sub(c.value), c.ttl_secs),
            None => (self.config.max_calls, 0),
        };
        RateLimitState {
            bucket_name: bucket.to_string(),
            remaining_calls,
            window_reset_at: now + chrono::Duration::seconds(ttl as i64),
        }
    }

    /// Mark `bucket` exhausted for `retry_after` after the remote API refused
    /// a call, so other callers back off too.
    pub async fn record_remote_limit(&self, bucket: &str, retry_after: Duration) {
        tracing::warn!(
            bucket,
            retry_after_secs = retry_after.as_secs(),
            "remote rate limit hit, exhausting local bucket"
        );
        self.store
            .set_counter(
                &Self::key(bucket),
                self.config.max_calls,
                retry_after.as_secs().max(1),
            )
            .await;
    }

    /// Acquire a call, sleeping through short windows.
    ///
    /// `on_wait(true, secs)` is invoked before each sleep and `on_wait(false, 0)`
    /// once the wait is over, so a UI can show a countdown. A wait longer than
    /// `max_wait`, or more than `max_waits` waits in a row, fails with
    /// [`MeteringError::RateLimitExceeded`] carrying the remaining window.
    pub async fn acquire_or_wait<F>(&self, bucket: &str, on_wait: F) -> Result<(), MeteringError>
    where
        F: Fn(bool, u64),
    {
        let mut waits = 0;

        loop {
            let clearance = self.acquire(bucket).await;
            if clearance.granted {
                if waits > 0 {
                    on_wait(false, 0);
                }
                return Ok(());
            }

            let wait = Duration::from_secs(clearance.wait_seconds);
            if wait > self.config.max_wait || waits >= self.config.max_waits {
                if waits > 0 {
                    on_wait(false, 0);
                }
                metrics::record_rate_limit(bucket, "exceeded");
                return Err(MeteringError::RateLimitExceeded { retry_after: wait });
            }

            waits += 1;
            metrics::record_rate_limit(bucket, "waited");
            tracing::info!(
                bucket,
                wait_secs = clearance.wait_seconds,
                attempt = waits,
                "rate limit bucket exhausted, waiting for reset"
            );
            on_wait(true, clearance.wait_seconds);
            sleep(wait).await;
        }
    }
}
