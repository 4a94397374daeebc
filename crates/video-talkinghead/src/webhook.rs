//! Webhook reconciliation map: bridges an inbound HTTP callback to whichever
//! task is currently polling for the same provider task id, via a
//! one-shot single-delivery handoff since a talking-head render completes
//! exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use video_core::domain::VideoArtifact;

use crate::ProviderTaskId;

/// Shared map of in-flight renders waiting on a webhook callback.
#[derive(Default)]
pub struct WebhookRegistry {
    waiters: Mutex<HashMap<ProviderTaskId, oneshot::Sender<VideoArtifact>>>,
}

impl WebhookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `task_id`'s completion callback. Must be called
    /// before polling begins so a callback that arrives immediately is never
    /// missed.
    pub fn register(&self, task_id: ProviderTaskId) -> oneshot::Receiver<VideoArtifact> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(task_id, tx);
        rx
    }

    /// Deregister a waiter, e.g. after the poll loop won the race or the
    /// caller was cancelled.
    pub fn unregister(&self, task_id: &ProviderTaskId) {
        self.waiters.lock().unwrap().remove(task_id);
    }

    /// Deliver a completed render to its waiter, if one is still registered.
    /// Idempotent: a duplicate callback for an already-delivered or unknown
    /// task id is a no-op.
    pub fn deliver(&self, task_id: &ProviderTaskId, artifact: VideoArtifact) {
        let sender = self.waiters.lock().unwrap().remove(task_id);
        if let Some(sender) = sender {
            // Ignore a closed receiver: the poll loop already won the race.
            let _ = sender.send(artifact);
        } else {
            tracing::debug!(%task_id, "webhook callback for unknown or already-delivered task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> VideoArtifact {
        VideoArtifact {
            bytes: vec![1, 2, 3],
            duration_ms: 1000,
            container: "mp4".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_to_the_registered_waiter() {
        let registry = WebhookRegistry::new();
        let id = ProviderTaskId::new("task-1");
        let rx = registry.register(id.clone());
        registry.deliver(&id, artifact());
        assert_eq!(rx.await.unwrap(), artifact());
    }

    #[test]
    fn duplicate_or_unknown_callback_is_a_no_op() {
        let registry = WebhookRegistry::new();
        let id = ProviderTaskId::new("task-2");
        registry.deliver(&id, artifact());
        registry.deliver(&id, artifact());
    }

    #[test]
    fn unregister_removes_a_waiter_without_panicking() {
        let registry = WebhookRegistry::new();
        let id = ProviderTaskId::new("task-3");
        let _rx = registry.register(id.clone());
        registry.unregister(&id);
        registry.deliver(&id, artifact());
    }
}
