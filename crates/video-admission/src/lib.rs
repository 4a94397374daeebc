//! GPU admission controller.
//!
//! Bounds GPU VRAM and per-model concurrency with FIFO fairness across
//! pending requesters: a single coordinating actor (a plain
//! `std::sync::Mutex`, never held across an `.await`) and a `Notify` used to
//! wake waiters on capacity change. State is never exposed directly to
//! operators. The plain mutex lets [`Ticket::drop`] release synchronously on
//! every exit path, including a panicking operator.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use video_core::ModelId;

/// Static declaration for one registered model.
#[derive(Clone, Copy, Debug)]
pub struct ModelSpec {
    pub vram_cost_mb: u32,
    pub max_concurrency: u32,
}

/// Error returned by [`GpuAdmissionController::acquire`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission deadline exceeded")]
    DeadlineExceeded,
    #[error("admission request cancelled")]
    Cancelled,
    #[error("unknown model: {0}")]
    UnknownModel(String),
}

struct State {
    vram_used_mb: u32,
    vram_budget_mb: u32,
    outstanding: HashMap<ModelId, u32>,
    specs: HashMap<ModelId, ModelSpec>,
    /// FIFO arrival order of currently-waiting requesters.
    queue: VecDeque<u64>,
    next_seq: u64,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Coordinates GPU admission across all pipeline jobs.
#[derive(Clone)]
pub struct GpuAdmissionController {
    shared: Arc<Shared>,
}

impl GpuAdmissionController {
    #[must_use]
    pub fn new(vram_budget_mb: u32, specs: HashMap<ModelId, ModelSpec>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    vram_used_mb: 0,
                    vram_budget_mb,
                    outstanding: HashMap::new(),
                    specs,
                    queue: VecDeque::new(),
                    next_seq: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn vram_used_mb(&self) -> u32 {
        self.shared.state.lock().unwrap().vram_used_mb
    }

    /// Acquire a scoped admission ticket for `model`, blocking cooperatively
    /// until both the VRAM budget and the model's concurrency limit allow
    /// it, in FIFO arrival order.
    pub async fn acquire(
        &self,
        model: ModelId,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Ticket, AdmissionError> {
        let mut my_seq: Option<u64> = None;

        loop {
            {
                let mut st = self.shared.state.lock().unwrap();
                let spec = st
                    .specs
                    .get(&model)
                    .copied()
                    .ok_or_else(|| AdmissionError::UnknownModel(model.to_string()))?;

                let seq = *my_seq.get_or_insert_with(|| {
                    let seq = st.next_seq;
                    st.next_seq += 1;
                    st.queue.push_back(seq);
                    seq
                });

                let fits = st.vram_used_mb + spec.vram_cost_mb <= st.vram_budget_mb
                    && *st.outstanding.get(&model).unwrap_or(&0) < spec.max_concurrency;
                let is_front = st.queue.front() == Some(&seq);

                if fits && is_front {
                    st.queue.pop_front();
                    st.vram_used_mb += spec.vram_cost_mb;
                    *st.outstanding.entry(model.clone()).or_insert(0) += 1;
                    return Ok(Ticket {
                        shared: Arc::clone(&self.shared),
                        model,
                        vram_mb: spec.vram_cost_mb,
                        released: false,
                    });
                }
            }

            tokio::select! {
                () = self.shared.notify.notified() => {}
                () = tokio::time::sleep_until(deadline) => {
                    self.remove_waiter(my_seq);
                    return Err(AdmissionError::DeadlineExceeded);
                }
                () = cancel.cancelled() => {
                    self.remove_waiter(my_seq);
                    return Err(AdmissionError::Cancelled);
                }
            }
        }
    }

    fn remove_waiter(&self, seq: Option<u64>) {
        if let Some(seq) = seq {
            let mut st = self.shared.state.lock().unwrap();
            st.queue.retain(|s| *s != seq);
            drop(st);
            // Another waiter may now be at the front; let it re-check.
            self.shared.notify.notify_waiters();
        }
    }
}

fn release(shared: &Shared, model: &ModelId, vram_mb: u32) {
    let mut st = shared.state.lock().unwrap();
    st.vram_used_mb = st.vram_used_mb.saturating_sub(vram_mb);
    if let Some(count) = st.outstanding.get_mut(model) {
        *count = count.saturating_sub(1);
    }
    drop(st);
    shared.notify.notify_waiters();
}

/// A scoped acquisition of `vram_mb` VRAM on `model`. Released on every
/// exit path via `Drop`, including a
/// panicking operator; an explicit [`Ticket::release`] is also available
/// for callers that want to free the ticket before the end of their scope.
#[must_use = "dropping a Ticket releases it; hold it for the duration of the operator call"]
pub struct Ticket {
    shared: Arc<Shared>,
    model: ModelId,
    vram_mb: u32,
    released: bool,
}

impl Ticket {
    #[must_use]
    pub fn model(&self) -> &ModelId {
        &self.model
    }

    #[must_use]
    pub fn vram_mb(&self) -> u32 {
        self.vram_mb
    }

    /// Release early. Idempotent: releasing an already-released ticket only
    /// logs a warning.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            warn!(model = %self.model, "double release of admission ticket");
            return;
        }
        self.released = true;
        release(&self.shared, &self.model, self.vram_mb);
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.do_release();
    }
}
