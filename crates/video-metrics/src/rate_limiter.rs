//! Per-client token-bucket rate limiter: 30 requests/minute steady rate
//! with a burst allowance of 5.
//!
//! Grounded on the admission controller's `std::sync::Mutex` discipline in
//! `video-admission`: the critical section here is a handful of
//! floating-point operations, never an `.await`, so a plain (non-async)
//! mutex is the right tool.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::time::Instant;

use video_core::ids::ClientFingerprint;

const CAPACITY: f64 = 5.0;
/// 30 requests/minute == 0.5 tokens/second.
const REFILL_PER_SEC: f64 = 30.0 / 60.0;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket per client fingerprint.
pub struct RateLimiter {
    buckets: Mutex<HashMap<ClientFingerprint, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token for `client`. Returns `true` if the
    /// request is admitted, `false` if the client should be rate limited
    /// with `429 RATE_LIMITED`.
    pub fn try_acquire(&self, client: &ClientFingerprint) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(client.clone()).or_insert_with(|| Bucket {
            tokens: CAPACITY,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * REFILL_PER_SEC).min(CAPACITY);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop bucket state for clients that have been idle long enough to
    /// have fully refilled; bounds the map's memory under churn.
    pub fn evict_idle(&self, idle_for: std::time::Duration) {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle_for);
    }
}
