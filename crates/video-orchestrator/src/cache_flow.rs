//! Cache-consult-or-produce glue: the single place the orchestrator
//! decides whether a stage's output can come from the [`ResultCache`] or
//! must be computed.
//!
//! Grounded on `ResultCache::get`'s three-way [`GetOutcome`] contract: a
//! stage with no TTL bypasses the cache entirely, a `Hit`/`Produce` resolve
//! directly, and a `Wait` that degrades to a soft miss (the producer failed
//! or was dropped) falls through to a fresh `get` so the waiter becomes the
//! new producer rather than giving up.

use std::future::Future;
use std::time::Duration;

use video_core::domain::{Artifact, StageKind};
use video_core::error::PipelineError;
use video_core::fingerprint::Fingerprint;
use video_cache::{GetOutcome, ResultCache};
use video_metrics::StageMetrics;

/// Run `produce` through the cache for `stage`/`key`, honoring `ttl_secs`.
/// `ttl_secs == None` means "never cached" (the talking-head and BGM-mix
/// stages) and `produce` is simply awaited.
pub async fn cached_stage<F, Fut>(
    cache: &ResultCache,
    metrics: &StageMetrics,
    stage: StageKind,
    key: Fingerprint,
    ttl_secs: Option<u64>,
    produce: F,
) -> Result<Artifact, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Artifact, PipelineError>>,
{
    let Some(ttl) = ttl_secs else {
        return produce().await;
    };

    loop {
        match cache.get(key).await {
            GetOutcome::Hit(artifact) => {
                metrics.record_cache_hit(stage);
                return Ok(artifact);
            }
            GetOutcome::Produce(guard) => {
                metrics.record_cache_miss(stage);
                return match produce().await {
                    Ok(artifact) => {
                        guard.complete(artifact.clone(), Duration::from_secs(ttl)).await;
                        Ok(artifact)
                    }
                    Err(err) => {
                        guard.fail().await;
                        Err(err)
                    }
                };
            }
            GetOutcome::Wait(mut rx) => {
                if rx.changed().await.is_ok() {
                    if let Some(artifact) = rx.borrow().clone() {
                        metrics.record_cache_hit(stage);
                        return Ok(artifact);
                    }
                }
                // The producer we were waiting on failed or was dropped
                // without reporting a result: loop back and race to become
                // the new producer ourselves.
            }
        }
    }
}
