//! Talking-head submit/poll/webhook client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use video_core::domain::{AudioArtifact, ImageArtifact, VideoArtifact, VideoQuality};
use video_core::error::PipelineError;
use video_core::retry::RetryPolicy;

use crate::webhook::WebhookRegistry;

/// Opaque id assigned by the talking-head provider to one submitted render.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderTaskId(String);

impl ProviderTaskId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one poll request.
pub enum PollOutcome {
    Pending,
    Ready(VideoArtifact),
    Failed(PipelineError),
}

/// Black-box talking-head rendering provider.
#[async_trait]
pub trait TalkingHeadBackend: Send + Sync {
    async fn submit(
        &self,
        image: &ImageArtifact,
        audio: &AudioArtifact,
        quality: VideoQuality,
    ) -> Result<ProviderTaskId, PipelineError>;

    async fn poll(&self, task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError>;
}

/// Polling cadence: an initial delay before the first poll, then a fixed
/// interval.
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Overall submit-to-completion deadline for `StageKind::TalkingHead`.
const OVERALL_DEADLINE: Duration = Duration::from_secs(120);

pub struct TalkingHeadClient {
    backend: Arc<dyn TalkingHeadBackend>,
    registry: Arc<WebhookRegistry>,
    retry_policy: RetryPolicy,
}

impl TalkingHeadClient {
    #[must_use]
    pub fn new(backend: Arc<dyn TalkingHeadBackend>, registry: Arc<WebhookRegistry>) -> Self {
        Self {
            backend,
            registry,
            retry_policy: RetryPolicy::talking_head_default(),
        }
    }

    /// Submit a render and wait for it to complete, racing a webhook
    /// callback against a poll loop, both bounded by an overall deadline.
    pub async fn generate(
        &self,
        image: &ImageArtifact,
        audio: &AudioArtifact,
        quality: VideoQuality,
        cancel: &CancellationToken,
    ) -> Result<VideoArtifact, PipelineError> {
        let task_id = self.submit_with_retry(image, audio, quality, cancel).await?;
        let mut webhook_rx = self.registry.register(task_id.clone());

        let deadline = Instant::now() + OVERALL_DEADLINE;
        let mut poll_at = Instant::now() + POLL_INITIAL_DELAY;

        let result = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    break Err(PipelineError::Cancelled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    break Err(PipelineError::timeout("talking-head render exceeded its deadline"));
                }
                artifact = &mut webhook_rx => {
                    // A closed sender (registry dropped mid-job) is a
                    // terminal condition here, not a reason to keep
                    // looping: this arm must not be selected again once
                    // resolved, since a completed oneshot stays Ready.
                    break artifact.map_err(|_| {
                        PipelineError::internal("webhook registry closed before delivery")
                    });
                }
                () = tokio::time::sleep_until(poll_at) => {
                    match self.backend.poll(&task_id).await {
                        Ok(PollOutcome::Ready(artifact)) => break Ok(artifact),
                        Ok(PollOutcome::Failed(err)) => break Err(err),
                        Ok(PollOutcome::Pending) => {
                            poll_at = Instant::now() + POLL_INTERVAL;
                        }
                        Err(err) if err.is_retriable() => {
                            poll_at = Instant::now() + POLL_INTERVAL;
                        }
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        self.registry.unregister(&task_id);
        result
    }

    async fn submit_with_retry(
        &self,
        image: &ImageArtifact,
        audio: &AudioArtifact,
        quality: VideoQuality,
        cancel: &CancellationToken,
    ) -> Result<ProviderTaskId, PipelineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = self.backend.submit(image, audio, quality) => outcome,
            };
            match outcome {
                Ok(id) => return Ok(id),
                Err(PipelineError::RateLimited { retry_after_secs })
                    if attempt < self.retry_policy.max_attempts =>
                {
                    tracing::warn!(retry_after_secs, attempt, "talking-head submit rate limited");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        () = tokio::time::sleep(Duration::from_secs(retry_after_secs)) => {}
                    }
                }
                Err(err) if err.is_retriable() && attempt < self.retry_policy.max_attempts => {
                    let scale = self.retry_policy.factor.powi(attempt as i32 - 1);
                    let delay = self.retry_policy.base_delay.mul_f64(scale);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying talking-head submit");
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn image() -> ImageArtifact {
        ImageArtifact {
            bytes: vec![0u8; 16],
            width: 4,
            height: 4,
            has_alpha: false,
        }
    }

    fn audio() -> AudioArtifact {
        AudioArtifact {
            bytes: vec![0u8; 16],
            sample_rate_hz: 22_050,
            duration_ms: 100,
        }
    }

    fn video() -> VideoArtifact {
        VideoArtifact {
            bytes: vec![1, 2, 3],
            duration_ms: 100,
            container: "mp4".to_string(),
        }
    }

    struct ReadyAfterNPolls {
        task_id: ProviderTaskId,
        ready_after: u32,
        polls: AtomicU32,
    }

    #[async_trait]
    impl TalkingHeadBackend for ReadyAfterNPolls {
        async fn submit(
            &self,
            _image: &ImageArtifact,
            _audio: &AudioArtifact,
            _quality: VideoQuality,
        ) -> Result<ProviderTaskId, PipelineError> {
            Ok(self.task_id.clone())
        }

        async fn poll(&self, _task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                Ok(PollOutcome::Ready(video()))
            } else {
                Ok(PollOutcome::Pending)
            }
        }
    }

    struct NeverReady;

    #[async_trait]
    impl TalkingHeadBackend for NeverReady {
        async fn submit(
            &self,
            _image: &ImageArtifact,
            _audio: &AudioArtifact,
            _quality: VideoQuality,
        ) -> Result<ProviderTaskId, PipelineError> {
            Ok(ProviderTaskId::new("never"))
        }

        async fn poll(&self, _task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError> {
            Ok(PollOutcome::Pending)
        }
    }

    struct RateLimitedThenOk {
        attempts: AsyncMutex<u32>,
    }

    #[async_trait]
    impl TalkingHeadBackend for RateLimitedThenOk {
        async fn submit(
            &self,
            _image: &ImageArtifact,
            _audio: &AudioArtifact,
            _quality: VideoQuality,
        ) -> Result<ProviderTaskId, PipelineError> {
            let mut attempts = self.attempts.lock().await;
            *attempts += 1;
            if *attempts == 1 {
                Err(PipelineError::rate_limited(1))
            } else {
                Ok(ProviderTaskId::new("rl-task"))
            }
        }

        async fn poll(&self, _task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError> {
            Ok(PollOutcome::Ready(video()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_eventually_observes_ready() {
        let backend = Arc::new(ReadyAfterNPolls {
            task_id: ProviderTaskId::new("poll-task"),
            ready_after: 2,
            polls: AtomicU32::new(0),
        });
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry);
        let cancel = CancellationToken::new();
        let out = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap();
        assert_eq!(out, video());
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_delivery_wins_over_polling() {
        let backend = Arc::new(NeverReady);
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry.clone());
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.deliver(&ProviderTaskId::new("never"), video());
            }
        });

        let out = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap();
        assert_eq!(out, video());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_when_never_ready() {
        let backend = Arc::new(NeverReady);
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry);
        let cancel = CancellationToken::new();
        let err = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn cancellation_returns_promptly() {
        let backend = Arc::new(NeverReady);
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });
        let err = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_submit_honors_retry_after() {
        let backend = Arc::new(RateLimitedThenOk {
            attempts: AsyncMutex::new(0),
        });
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry);
        let cancel = CancellationToken::new();
        let out = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap();
        assert_eq!(out, video());
    }

    struct AlwaysRateLimited;

    #[async_trait]
    impl TalkingHeadBackend for AlwaysRateLimited {
        async fn submit(
            &self,
            _image: &ImageArtifact,
            _audio: &AudioArtifact,
            _quality: VideoQuality,
        ) -> Result<ProviderTaskId, PipelineError> {
            Err(PipelineError::rate_limited(30))
        }

        async fn poll(&self, _task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError> {
            Ok(PollOutcome::Pending)
        }
    }

    #[tokio::test]
    async fn cancellation_during_submit_backoff_returns_promptly() {
        let backend = Arc::new(AlwaysRateLimited);
        let registry = Arc::new(WebhookRegistry::new());
        let client = TalkingHeadClient::new(backend, registry);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });
        let err = client
            .generate(&image(), &audio(), VideoQuality::Standard, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
