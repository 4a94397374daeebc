//! Result cache.
//!
//! Content-addressed store of stage outputs with TTL and size bounds,
//! guaranteeing at-most-one concurrent producer per fingerprint ("stampede
//! control"): a single lock guarding an `IndexMap`-backed LRU, and a
//! `tokio::sync::watch` channel broadcasting one producer's result (the
//! produced artifact, or a soft failure) to every other waiter.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use video_core::domain::Artifact;
use video_core::fingerprint::Fingerprint;

struct Entry {
    artifact: Artifact,
    size_bytes: usize,
    ttl_deadline: Instant,
    hits: u64,
}

enum Slot {
    Ready(Entry),
    /// Another caller is currently producing this key; `tx` broadcasts the
    /// result (`Some(artifact)`) or a soft failure (`None`) to all waiters.
    Pending(watch::Sender<Option<Artifact>>),
}

struct Inner {
    slots: IndexMap<Fingerprint, Slot>,
    total_bytes: usize,
    byte_budget: usize,
}

impl Inner {
    fn evict_until_fits(&mut self, incoming: usize) {
        // LRU: IndexMap preserves insertion order; a `get` promotes a ready
        // entry to the back, so the front is always the least-recently-used.
        while self.total_bytes + incoming > self.byte_budget {
            let Some((key, _)) = self.slots.iter().find(|(_, s)| matches!(s, Slot::Ready(_)))
            else {
                break;
            };
            let key = *key;
            if let Some(Slot::Ready(entry)) = self.slots.shift_remove(&key) {
                debug!(%key, size_bytes = entry.size_bytes, "evicting cache entry (LRU)");
                self.total_bytes -= entry.size_bytes;
            }
        }
    }

    fn promote(&mut self, key: Fingerprint) {
        if let Some(idx) = self.slots.get_index_of(&key) {
            let last = self.slots.len() - 1;
            self.slots.move_index(idx, last);
        }
    }
}

/// Outcome of a [`ResultCache::get`] call.
pub enum GetOutcome {
    /// A live entry was found; `hits` has been incremented.
    Hit(Artifact),
    /// No entry exists and no one else is producing it. The caller is now
    /// responsible for computing the value and reporting it through the
    /// returned [`ProducerGuard`].
    Produce(ProducerGuard),
    /// Another caller is already producing this key. Await `changed()` on
    /// the receiver (or call [`wait_for_result`]) to get the same result
    /// every waiter will see.
    Wait(watch::Receiver<Option<Artifact>>),
}

/// Outcome of a [`ResultCache::put`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// `size_bytes` exceeded the cache's byte budget; the caller should
    /// proceed as if the put never happened.
    Refused,
}

/// Content-addressed cache of stage outputs.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Mutex<Inner>>,
}

impl ResultCache {
    #[must_use]
    pub fn new(byte_budget: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: IndexMap::new(),
                total_bytes: 0,
                byte_budget,
            })),
        }
    }

    /// Look up `key`. Never returns an entry past its `ttl_deadline`; an
    /// expired entry is evicted as part of the lookup.
    pub async fn get(&self, key: Fingerprint) -> GetOutcome {
        let mut guard = self.inner.lock().await;

        if let Some(slot) = guard.slots.get(&key) {
            match slot {
                Slot::Ready(entry) if entry.ttl_deadline > Instant::now() => {}
                Slot::Ready(_) => {
                    // Expired: evict and fall through to a fresh miss.
                    if let Some(Slot::Ready(entry)) = guard.slots.shift_remove(&key) {
                        guard.total_bytes -= entry.size_bytes;
                    }
                }
                Slot::Pending(tx) => {
                    return GetOutcome::Wait(tx.subscribe());
                }
            }
        }

        if let Some(Slot::Ready(entry)) = guard.slots.get_mut(&key) {
            entry.hits += 1;
            let artifact = entry.artifact.clone();
            guard.promote(key);
            return GetOutcome::Hit(artifact);
        }

        let (tx, _rx) = watch::channel(None);
        guard.slots.insert(key, Slot::Pending(tx.clone()));
        GetOutcome::Produce(ProducerGuard {
            cache: self.inner.clone(),
            key,
            tx: Some(tx),
        })
    }

    /// Insert a freshly produced artifact directly (used by
    /// [`ProducerGuard::complete`], and available for callers that already
    /// know they are the sole producer).
    pub async fn put(&self, key: Fingerprint, artifact: Artifact, ttl: Duration) -> PutOutcome {
        let size_bytes = artifact.size_bytes();
        let mut guard = self.inner.lock().await;

        if size_bytes > guard.byte_budget {
            warn!(%key, size_bytes, budget = guard.byte_budget, "refusing oversized cache entry");
            return PutOutcome::Refused;
        }

        // Replace any existing (possibly pending) slot for this key.
        if let Some(Slot::Ready(old)) = guard.slots.shift_remove(&key) {
            guard.total_bytes -= old.size_bytes;
        }

        guard.evict_until_fits(size_bytes);
        guard.slots.insert(
            key,
            Slot::Ready(Entry {
                artifact,
                size_bytes,
                ttl_deadline: Instant::now() + ttl,
                hits: 0,
            }),
        );
        guard.total_bytes += size_bytes;
        PutOutcome::Inserted
    }

    /// Remove `key`; any in-flight producer still completes, but its result
    /// is not stored.
    pub async fn invalidate(&self, key: Fingerprint) {
        let mut guard = self.inner.lock().await;
        if let Some(Slot::Ready(entry)) = guard.slots.shift_remove(&key) {
            guard.total_bytes -= entry.size_bytes;
        }
    }

    #[must_use]
    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes
    }

    #[must_use]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }
}

/// Scoped handle returned to the sole producer for a cache key. Dropping it
/// without calling [`complete`](Self::complete) degrades to a soft miss for
/// all waiters: a cache failure never fails the job it's backing.
pub struct ProducerGuard {
    cache: Arc<Mutex<Inner>>,
    key: Fingerprint,
    tx: Option<watch::Sender<Option<Artifact>>>,
}

impl ProducerGuard {
    /// Report a successfully produced artifact: stores it (subject to the
    /// byte budget) and wakes all waiters with the same value.
    pub async fn complete(mut self, artifact: Artifact, ttl: Duration) -> PutOutcome {
        let tx = self.tx.take().expect("complete called once");
        let size_bytes = artifact.size_bytes();
        let mut guard = self.cache.lock().await;

        let outcome = if size_bytes > guard.byte_budget {
            None
        } else {
            guard.evict_until_fits(size_bytes);
            guard.slots.insert(
                self.key,
                Slot::Ready(Entry {
                    artifact: artifact.clone(),
                    size_bytes,
                    ttl_deadline: Instant::now() + ttl,
                    hits: 0,
                }),
            );
            guard.total_bytes += size_bytes;
            Some(PutOutcome::Inserted)
        };
        drop(guard);

        let _ = tx.send(Some(artifact));
        outcome.unwrap_or(PutOutcome::Refused)
    }

    /// Report that production failed: removes the pending slot and wakes
    /// all waiters with a miss. Soft by construction — the caller is
    /// expected to fall back to direct execution, never to fail the job.
    pub async fn fail(mut self) {
        self.clear_pending_slot().await;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(None);
        }
    }

    async fn clear_pending_slot(&self) {
        let mut guard = self.cache.lock().await;
        if matches!(guard.slots.get(&self.key), Some(Slot::Pending(_))) {
            guard.slots.shift_remove(&self.key);
        }
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Producer was dropped (panic, early return) without reporting
            // a result: best-effort synchronous cleanup so the key can be
            // produced again, then notify any waiters of a soft miss.
            if let Ok(mut guard) = self.cache.try_lock() {
                if matches!(guard.slots.get(&self.key), Some(Slot::Pending(_))) {
                    guard.slots.shift_remove(&self.key);
                }
            }
            let _ = tx.send(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_core::domain::{Artifact, AudioArtifact};
    use video_core::fingerprint::{FingerprintBuilder, ParamValue};
    use video_core::ids::OperatorVersion;

    fn key(name: &str) -> Fingerprint {
        FingerprintBuilder::new("op", OperatorVersion(1))
            .with_param("name", &ParamValue::Str(name.to_string()))
            .finish()
    }

    fn audio(bytes: usize) -> Artifact {
        Artifact::Audio(AudioArtifact {
            bytes: vec![0u8; bytes],
            sample_rate_hz: 22_050,
            duration_ms: 1000,
        })
    }

    #[tokio::test]
    async fn miss_then_hit_after_producer_completes() {
        let cache = ResultCache::new(1_000_000);
        let k = key("a");
        let guard = match cache.get(k).await {
            GetOutcome::Produce(g) => g,
            _ => panic!("expected Produce"),
        };
        guard.complete(audio(10), Duration::from_secs(60)).await;

        match cache.get(k).await {
            GetOutcome::Hit(a) => assert_eq!(a.size_bytes(), 10),
            _ => panic!("expected Hit"),
        }
    }

    #[tokio::test]
    async fn concurrent_waiters_see_the_same_result_stampede_free() {
        let cache = ResultCache::new(1_000_000);
        let k = key("b");

        let guard = match cache.get(k).await {
            GetOutcome::Produce(g) => g,
            _ => panic!("expected first caller to produce"),
        };

        // A second caller while production is in flight must wait, not
        // become a second producer.
        let mut waiter = match cache.get(k).await {
            GetOutcome::Wait(rx) => rx,
            _ => panic!("expected Wait for second caller"),
        };

        guard.complete(audio(5), Duration::from_secs(60)).await;
        waiter.changed().await.unwrap();
        let result = waiter.borrow().clone();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn failed_production_degrades_to_miss_not_job_failure() {
        let cache = ResultCache::new(1_000_000);
        let k = key("c");
        let guard = match cache.get(k).await {
            GetOutcome::Produce(g) => g,
            _ => panic!("expected Produce"),
        };
        guard.fail().await;

        match cache.get(k).await {
            GetOutcome::Produce(_) => {}
            _ => panic!("expected a fresh miss to allow a retry producer"),
        }
    }

    #[tokio::test]
    async fn oversized_put_is_refused_not_an_error() {
        let cache = ResultCache::new(10);
        let k = key("d");
        let outcome = cache.put(k, audio(100), Duration::from_secs(60)).await;
        assert_eq!(outcome, PutOutcome::Refused);
        assert_eq!(cache.total_bytes().await, 0);
    }

    #[tokio::test]
    async fn lru_eviction_keeps_total_under_budget() {
        let cache = ResultCache::new(15);
        cache
            .put(key("a"), audio(10), Duration::from_secs(60))
            .await;
        cache
            .put(key("b"), audio(10), Duration::from_secs(60))
            .await;
        assert!(cache.total_bytes().await <= 15);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        tokio::time::pause();
        let cache = ResultCache::new(1_000_000);
        let k = key("e");
        cache
            .put(k, audio(10), Duration::from_millis(100))
            .await;
        tokio::time::advance(Duration::from_millis(200)).await;
        match cache.get(k).await {
            GetOutcome::Produce(_) => {}
            _ => panic!("expected entry to have expired into a miss"),
        }
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = ResultCache::new(1_000_000);
        let k = key("f");
        cache.put(k, audio(10), Duration::from_secs(60)).await;
        cache.invalidate(k).await;
        match cache.get(k).await {
            GetOutcome::Produce(_) => {}
            _ => panic!("expected miss after invalidate"),
        }
    }
}
