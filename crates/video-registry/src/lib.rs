//! Job registry.
//!
//! Sharded `HashMap<JobId, Arc<Mutex<Entry>>>` behind a per-shard `RwLock`: a
//! coarse lock protecting shard membership, a fine-grained lock per tracked
//! job. Lock order is always "shard lock before per-job lock," upheld by
//! every method in this file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use video_core::domain::Job;
use video_core::ids::JobId;

/// Number of independent shards; bounds lock contention under concurrent
/// submission without the complexity of a lock-free map.
const SHARD_COUNT: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} already exists")]
    AlreadyExists(JobId),
    #[error("job {0} not found")]
    NotFound(JobId),
}

struct Entry {
    job: Job,
    touched_at: Instant,
}

type Shard = RwLock<HashMap<JobId, Arc<Mutex<Entry>>>>;

/// The job registry: owned by the orchestrator, one entry per submitted job.
pub struct JobRegistry {
    shards: Vec<Shard>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(id: JobId) -> usize {
        (id.as_u128() % SHARD_COUNT as u128) as usize
    }

    /// Register a freshly submitted job. Fails if the id is already taken
    /// (should not happen with random 128-bit ids, but is checked rather
    /// than assumed).
    pub async fn create(&self, job: Job) -> Result<(), RegistryError> {
        let id = job.id;
        let mut shard = self.shards[Self::shard_index(id)].write().await;
        if shard.contains_key(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }
        shard.insert(
            id,
            Arc::new(Mutex::new(Entry {
                job,
                touched_at: Instant::now(),
            })),
        );
        Ok(())
    }

    /// Return a stable, immutable snapshot of `id`'s current state. The
    /// per-job lock is held only long enough to clone the `Job` value, so
    /// readers never observe a torn write in progress.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        let entry = {
            let shard = self.shards[Self::shard_index(id)].read().await;
            shard.get(&id).cloned()
        }?;
        let guard = entry.lock().await;
        Some(guard.job.clone())
    }

    /// Apply `mutator` to the job's current state, unless it has already
    /// reached a terminal state (`Succeeded`/`Failed`/`Cancelled`, which are
    /// sticky: no subsequent state mutation is observable). A mutation
    /// attempt on an already-terminal job is silently ignored rather than
    /// treated as an error, since races between a late stage completion and
    /// a job-level cancellation are expected, not exceptional.
    pub async fn update<F>(&self, id: JobId, mutator: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Job),
    {
        let entry = {
            let shard = self.shards[Self::shard_index(id)].read().await;
            shard.get(&id).cloned()
        }
        .ok_or(RegistryError::NotFound(id))?;

        let mut guard = entry.lock().await;
        if guard.job.state.is_terminal() {
            tracing::debug!(%id, state = ?guard.job.state, "ignoring mutation of a terminal job");
            return Ok(());
        }
        mutator(&mut guard.job);
        guard.touched_at = Instant::now();
        Ok(())
    }

    /// Remove terminal jobs that have not been touched in at least
    /// `max_age`. Returns the number of jobs removed. Jobs currently being
    /// read or mutated by another task are left for the next sweep rather
    /// than waited on.
    pub async fn reap(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        for shard_lock in &self.shards {
            let mut shard = shard_lock.write().await;
            let expired: Vec<JobId> = shard
                .iter()
                .filter_map(|(id, entry)| {
                    let guard = entry.try_lock().ok()?;
                    (guard.job.state.is_terminal() && guard.touched_at.elapsed() >= max_age)
                        .then_some(*id)
                })
                .collect();
            for id in expired {
                shard.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Total number of tracked jobs across all shards.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard_lock in &self.shards {
            total += shard_lock.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
