//! Stage latency, error-rate, and cache-hit tracking.
//!
//! Observability elsewhere in the workspace is structured `tracing`
//! events. This module keeps that convention (every recording emits a
//! structured event) while also keeping lightweight in-process counters so
//! the orchestrator — and its tests — can read back aggregates without
//! standing up a tracing subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use video_core::domain::StageKind;

#[derive(Default)]
struct StageCounters {
    count: u64,
    total_latency_ms: u64,
    errors: u64,
}

/// Aggregate counters for one pipeline's worth of stage executions.
pub struct StageMetrics {
    per_stage: Mutex<HashMap<StageKind, StageCounters>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            per_stage: Mutex::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Record one stage execution's outcome and latency.
    pub fn record_stage(&self, stage: StageKind, latency: Duration, succeeded: bool) {
        let latency_ms = latency.as_millis() as u64;
        {
            let mut per_stage = self.per_stage.lock().unwrap();
            let counters = per_stage.entry(stage).or_default();
            counters.count += 1;
            counters.total_latency_ms += latency_ms;
            if !succeeded {
                counters.errors += 1;
            }
        }
        tracing::info!(?stage, latency_ms, succeeded, "stage execution recorded");
    }

    pub fn record_cache_hit(&self, stage: StageKind) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?stage, "cache hit");
    }

    pub fn record_cache_miss(&self, stage: StageKind) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?stage, "cache miss");
    }

    #[must_use]
    pub fn mean_latency_ms(&self, stage: StageKind) -> Option<f64> {
        let per_stage = self.per_stage.lock().unwrap();
        let counters = per_stage.get(&stage)?;
        if counters.count == 0 {
            return None;
        }
        Some(counters.total_latency_ms as f64 / counters.count as f64)
    }

    #[must_use]
    pub fn error_rate(&self, stage: StageKind) -> Option<f64> {
        let per_stage = self.per_stage.lock().unwrap();
        let counters = per_stage.get(&stage)?;
        if counters.count == 0 {
            return None;
        }
        Some(counters.errors as f64 / counters.count as f64)
    }

    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_latency_and_error_rate_are_tracked_per_stage() {
        let metrics = StageMetrics::new();
        metrics.record_stage(StageKind::PersonDetection, Duration::from_millis(100), true);
        metrics.record_stage(StageKind::PersonDetection, Duration::from_millis(300), false);

        assert_eq!(metrics.mean_latency_ms(StageKind::PersonDetection), Some(200.0));
        assert_eq!(metrics.error_rate(StageKind::PersonDetection), Some(0.5));
        assert_eq!(metrics.mean_latency_ms(StageKind::TtsSynthesis), None);
    }

    #[test]
    fn cache_hit_ratio_reflects_recorded_hits_and_misses() {
        let metrics = StageMetrics::new();
        assert_eq!(metrics.cache_hit_ratio(), 0.0);
        metrics.record_cache_hit(StageKind::PersonDetection);
        metrics.record_cache_hit(StageKind::PersonDetection);
        metrics.record_cache_miss(StageKind::PersonDetection);
        assert!((metrics.cache_hit_ratio() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
