//! Shared exponential-backoff retry loop: base 500ms, factor 2, jitter
//! ±20%, capped at 3 attempts. A plain loop, sleep-then-retry on a
//! retriable error, propagate immediately otherwise.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::PipelineError;

/// Backoff policy: base delay, multiplicative factor, proportional jitter,
/// and a hard cap on attempts. Operator default: 500ms / 2x / ±20% / 3.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn operator_default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.20,
            max_attempts: 3,
        }
    }

    /// Talking-head submit/poll policy: base 1s, factor 2, capped at 3.
    #[must_use]
    pub const fn talking_head_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.20,
            max_attempts: 3,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32 - 1);
        let base_ms = self.base_delay.as_millis() as f64 * scale;
        let jitter_span = base_ms * self.jitter;
        let jittered = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((base_ms + jittered).max(0.0) as u64)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between retriable failures. Stops immediately on a
/// non-retriable error. The attempt itself and the backoff sleep are both
/// raced against `cancel`, so a cancelled job never blocks for a full
/// attempt or a full backoff delay.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = op(attempt) => outcome,
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = %err, "retrying after transient error");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_the_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let result: Result<(), PipelineError> =
            with_retry(RetryPolicy::operator_default(), &cancel, move |_attempt| {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::transient("boom"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_once_successful() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let result = with_retry(RetryPolicy::operator_default(), &cancel, move |attempt| {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(PipelineError::transient("boom"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retriable_errors_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let result: Result<(), PipelineError> =
            with_retry(RetryPolicy::operator_default(), &cancel, move |_attempt| {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::invalid_input("bad"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_promptly() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });
        let result: Result<(), PipelineError> =
            with_retry(RetryPolicy::operator_default(), &cancel, move |_attempt| {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::transient("boom"))
                }
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
