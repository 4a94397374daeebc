//! Pipeline orchestrator: wires the cache, admission controller, job
//! registry, metrics, and stage operators into the fixed two-branch DAG
//! and drives one job from submission to a terminal state.

mod cache_flow;
pub mod content_id;
mod stages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use video_admission::{GpuAdmissionController, ModelSpec};
use video_cache::ResultCache;
use video_core::domain::{
    Artifact, ArtifactId, ArtifactKind, ArtifactRef, AudioArtifact, BackgroundRemoverParams,
    ImageArtifact, Job, JobRequest, JobState, PersonDetectorParams, ProsodyParams, StageKind,
    StageState, TtsParams, VideoArtifact,
};
use video_core::error::PipelineError;
use video_core::fingerprint::Fingerprint;
use video_core::ids::{ClientFingerprint, JobId, ModelId};
use video_core::ports::StageOperator;
use video_metrics::StageMetrics;
use video_operators::backends::{
    BackgroundRemoverBackend, BgmAssetBackend, PersonDetectorBackend, TtsBackend,
};
use video_operators::{
    BackgroundRemovalInput, BackgroundRemover, PersonDetectionInput, PersonDetector, TtsSynthesizer,
};
use video_prosody::{ProsodyAdjuster, ProsodyBackend, ProsodyInput};
use video_registry::JobRegistry;
use video_talkinghead::client::TalkingHeadBackend;
use video_talkinghead::{ProviderTaskId, TalkingHeadClient, WebhookRegistry};

use content_id::content_artifact_id;

/// Overall job deadline: an outer bound on the whole job, independent of
/// (and tighter than) the sum of individual stage timeouts. Measured on
/// `tokio::time::Instant`, never wall-clock.
const JOB_DEADLINE_SECS: u64 = 180;

/// The client-supplied source image (and, optionally, pre-recorded speech)
/// for a job: uploaded once at submission time, outside the Result Cache's
/// ownership (neither has a producing stage of its own).
#[derive(Clone, Debug)]
pub struct JobInput {
    pub image_ref: ArtifactId,
    pub image: ImageArtifact,
    /// An already-recorded speech track. When present, `request.tts` must
    /// be absent and the TTS stage is marked `Skipped` rather than run
    /// (`audio` is optional; if absent, `text` and `voice` are required).
    pub audio: Option<AudioArtifact>,
}

struct Inner {
    cache: ResultCache,
    admission: GpuAdmissionController,
    registry: Arc<JobRegistry>,
    metrics: Arc<StageMetrics>,
    person_detector: Arc<PersonDetector>,
    background_remover: Arc<BackgroundRemover>,
    tts: Arc<TtsSynthesizer>,
    prosody: Arc<ProsodyAdjuster>,
    bgm: Arc<video_operators::BgmMixer>,
    talking_head: Arc<TalkingHeadClient>,
    webhook_registry: Arc<WebhookRegistry>,
    cancellations: AsyncMutex<HashMap<JobId, CancellationToken>>,
}

/// Coordinates one job through the fixed DAG: person detection and
/// background removal on one branch, TTS and optional prosody on the
/// other, merged at the talking-head render, followed by an optional BGM
/// mix. Cheap to clone; every clone shares the same underlying state.
#[derive(Clone)]
pub struct PipelineOrchestrator(Arc<Inner>);

impl std::ops::Deref for PipelineOrchestrator {
    type Target = Inner;

    fn deref(&self) -> &Inner {
        &self.0
    }
}

#[allow(clippy::too_many_arguments)]
impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        cache_byte_budget: usize,
        gpu_vram_budget_mb: u32,
        model_specs: HashMap<ModelId, ModelSpec>,
        person_detector_backend: Arc<dyn PersonDetectorBackend>,
        background_remover_backend: Arc<dyn BackgroundRemoverBackend>,
        tts_backend: Arc<dyn TtsBackend>,
        prosody_backend: Arc<dyn ProsodyBackend>,
        bgm_backend: Arc<dyn BgmAssetBackend>,
        talking_head_backend: Arc<dyn TalkingHeadBackend>,
    ) -> Self {
        let webhook_registry = Arc::new(WebhookRegistry::new());
        Self(Arc::new(Inner {
            cache: ResultCache::new(cache_byte_budget),
            admission: GpuAdmissionController::new(gpu_vram_budget_mb, model_specs),
            registry: Arc::new(JobRegistry::new()),
            metrics: Arc::new(StageMetrics::new()),
            person_detector: Arc::new(PersonDetector::new(person_detector_backend)),
            background_remover: Arc::new(BackgroundRemover::new(background_remover_backend)),
            tts: Arc::new(TtsSynthesizer::new(tts_backend)),
            prosody: Arc::new(ProsodyAdjuster::new(prosody_backend)),
            bgm: Arc::new(video_operators::BgmMixer::new(bgm_backend)),
            talking_head: Arc::new(TalkingHeadClient::new(talking_head_backend, Arc::clone(&webhook_registry))),
            webhook_registry,
            cancellations: AsyncMutex::new(HashMap::new()),
        }))
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<StageMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn webhook_registry(&self) -> Arc<WebhookRegistry> {
        Arc::clone(&self.webhook_registry)
    }

    /// Deliver a talking-head provider callback. A callback for an unknown
    /// or already-delivered task id is a no-op.
    pub fn deliver_webhook(&self, task_id: &ProviderTaskId, artifact: VideoArtifact) {
        self.webhook_registry.deliver(task_id, artifact);
    }

    /// Validate and register a new job, then drive it to completion on a
    /// detached task. Returns the job id immediately.
    pub async fn submit(
        &self,
        client: ClientFingerprint,
        request: JobRequest,
        input: JobInput,
    ) -> Result<JobId, PipelineError> {
        validate_request(&request, input.audio.is_some())?;

        let id = JobId::new_random();
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(JOB_DEADLINE_SECS as i64);
        let job = Job::new(id, client, request.clone(), now, deadline);
        self.registry
            .create(job)
            .await
            .map_err(|e| PipelineError::internal(e.to_string()))?;

        tokio::spawn(self.clone().drive(id, input, request));
        Ok(id)
    }

    #[must_use]
    pub async fn status(&self, id: JobId) -> Option<Job> {
        self.registry.get(id).await
    }

    /// Request cancellation of `id`. Idempotent: a job that is
    /// unknown, already terminal, or not currently running is left
    /// unaffected rather than treated as an error; the caller decides the
    /// HTTP-facing response from the job's resulting state.
    pub async fn cancel(&self, id: JobId) {
        if let Some(token) = self.cancellations.lock().await.get(&id) {
            token.cancel();
        }
        let _ = self.registry.update(id, |job| job.cancel_requested = true).await;
    }

    /// Spawn the supervising task that periodically reaps terminal jobs
    /// older than `max_age`; driven by the orchestrator, not a background
    /// thread owned by the registry itself.
    pub fn spawn_reaper(&self, period: Duration, max_age: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = registry.reap(max_age).await;
                if removed > 0 {
                    tracing::debug!(removed, "reaped terminal jobs");
                }
            }
        })
    }

    async fn drive(self, id: JobId, input: JobInput, request: JobRequest) {
        let _ = self.registry.update(id, |job| job.state = JobState::Running).await;

        let job_token = CancellationToken::new();
        self.cancellations.lock().await.insert(id, job_token.clone());

        let result = self.run_pipeline(id, input, request, job_token).await;

        self.cancellations.lock().await.remove(&id);
        self.finalize(id, result).await;
    }

    async fn run_pipeline(
        &self,
        id: JobId,
        input: JobInput,
        request: JobRequest,
        job_token: CancellationToken,
    ) -> Result<VideoArtifact, PipelineError> {
        let deadline = Instant::now() + Duration::from_secs(JOB_DEADLINE_SECS);
        let image_cancel = job_token.child_token();
        let audio_cancel = job_token.child_token();
        let JobInput { image_ref, image, audio } = input;

        let image_handle: JoinHandle<Result<ImageArtifact, PipelineError>> = tokio::spawn({
            let this = self.clone();
            let request = request.clone();
            let cancel = image_cancel.clone();
            async move { this.run_image_branch(id, image_ref, image, request, deadline, cancel).await }
        });

        let audio_handle: JoinHandle<Result<AudioArtifact, PipelineError>> = tokio::spawn({
            let this = self.clone();
            let request = request.clone();
            let cancel = audio_cancel.clone();
            async move { this.run_audio_branch(id, request, audio, deadline, cancel).await }
        });

        let (image_result, audio_result) =
            race_branches(image_handle, audio_handle, &image_cancel, &audio_cancel).await;

        let mask = image_result?;
        let audio = audio_result?;

        self.mark_stage_running(id, StageKind::TalkingHead).await;
        let start = Instant::now();
        let video = self
            .talking_head
            .generate(&mask, &audio, request.video_quality, &job_token)
            .await;
        self.metrics.record_stage(StageKind::TalkingHead, start.elapsed(), video.is_ok());
        self.record_stage_result::<VideoArtifact>(id, StageKind::TalkingHead, None, &video).await;
        let video = video?;

        let Some(bgm_params) = request.bgm.clone() else {
            return Ok(video);
        };

        self.mark_stage_running(id, StageKind::BgmMix).await;
        let mixed = stages::run_bgm(&self.bgm, &self.metrics, audio, bgm_params, &job_token).await;
        self.record_stage_result::<AudioArtifact>(id, StageKind::BgmMix, None, &mixed).await;
        // Muxing the mixed track back into the rendered container is out of
        // scope (no real video codec support); the mix is still tracked on
        // the job for observability, but the delivered video is the render
        // produced above.
        mixed?;
        Ok(video)
    }

    async fn run_image_branch(
        &self,
        id: JobId,
        image_ref: ArtifactId,
        image: ImageArtifact,
        request: JobRequest,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ImageArtifact, PipelineError> {
        self.mark_stage_running(id, StageKind::PersonDetection).await;
        let detection_input = PersonDetectionInput {
            image_ref,
            image: image.clone(),
        };
        let detection_fp = self.person_detector.fingerprint(&detection_input, &request.detector);
        let detections = stages::run_person_detection(
            &self.person_detector,
            &self.cache,
            &self.metrics,
            &self.admission,
            image_ref,
            image.clone(),
            request.detector.clone(),
            deadline,
            &cancel,
        )
        .await;
        self.record_stage_result(id, StageKind::PersonDetection, Some(detection_fp), &detections)
            .await;
        // Detections are hint-only for this DAG edge: background removal
        // always runs on the full image regardless of what was found here;
        // the hint does not gate the mask stage.
        detections?;

        self.mark_stage_running(id, StageKind::BackgroundRemoval).await;
        let bg_input = BackgroundRemovalInput {
            image_ref,
            image: image.clone(),
        };
        let bg_fp = self.background_remover.fingerprint(&bg_input, &request.background);
        let mask = stages::run_background_removal(
            &self.background_remover,
            &self.cache,
            &self.metrics,
            &self.admission,
            image_ref,
            image,
            request.background.clone(),
            deadline,
            &cancel,
        )
        .await;
        self.record_stage_result(id, StageKind::BackgroundRemoval, Some(bg_fp), &mask).await;
        mask
    }

    async fn run_audio_branch(
        &self,
        id: JobId,
        request: JobRequest,
        audio_override: Option<AudioArtifact>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<AudioArtifact, PipelineError> {
        let audio = if let Some(audio) = audio_override {
            self.mark_stage_skipped(id, StageKind::TtsSynthesis).await;
            audio
        } else {
            let Some(tts_params) = request.tts.clone() else {
                return Err(PipelineError::invalid_input("tts parameters are required"));
            };
            self.mark_stage_running(id, StageKind::TtsSynthesis).await;
            let tts_fp = self.tts.fingerprint(&(), &tts_params);
            let result = stages::run_tts(&self.tts, &self.cache, &self.metrics, &self.admission, tts_params, deadline, &cancel).await;
            self.record_stage_result(id, StageKind::TtsSynthesis, Some(tts_fp), &result).await;
            result?
        };

        let Some(prosody_params) = request.prosody.clone() else {
            return Ok(audio);
        };

        self.mark_stage_running(id, StageKind::Prosody).await;
        let audio_ref = content_artifact_id(&audio.bytes);
        let prosody_input = ProsodyInput {
            audio_ref,
            audio: audio.clone(),
        };
        let prosody_fp = self.prosody.fingerprint(&prosody_input, &prosody_params);
        let prosody_out = stages::run_prosody(
            &self.prosody,
            &self.cache,
            &self.metrics,
            &self.admission,
            audio,
            prosody_params,
            deadline,
            &cancel,
        )
        .await;
        self.record_stage_result(id, StageKind::Prosody, Some(prosody_fp), &prosody_out).await;
        Ok(prosody_out?.audio)
    }

    async fn mark_stage_running(&self, id: JobId, stage: StageKind) {
        let now = Utc::now();
        let _ = self
            .registry
            .update(id, move |job| {
                if let Some(status) = job.stages.get_mut(&stage) {
                    status.state = StageState::Running;
                    status.started_at = Some(now);
                }
            })
            .await;
    }

    async fn mark_stage_skipped(&self, id: JobId, stage: StageKind) {
        let now = Utc::now();
        let _ = self
            .registry
            .update(id, move |job| {
                if let Some(status) = job.stages.get_mut(&stage) {
                    status.state = StageState::Skipped;
                    status.started_at = Some(now);
                    status.ended_at = Some(now);
                }
            })
            .await;
    }

    /// Record a stage's outcome on the job. `fingerprint` is `Some` only for
    /// cached stages, since artifact refs are owned by the cache; an
    /// uncached stage (talking-head, BGM mix) still records its
    /// state/timestamps but never gets an [`ArtifactRef`] entry.
    async fn record_stage_result<T>(
        &self,
        id: JobId,
        stage: StageKind,
        fingerprint: Option<Fingerprint>,
        result: &Result<T, PipelineError>,
    ) {
        let now = Utc::now();
        let (state, err_kind) = match result {
            Ok(_) => (StageState::Succeeded, None),
            Err(err) => (StageState::Failed, Some(err.code().to_string())),
        };
        let artifact_entry = match (&state, fingerprint) {
            (StageState::Succeeded, Some(fp)) => artifact_kind_for(stage).map(|kind| {
                (stage, ArtifactRef::new(ArtifactId::from_digest(*fp.as_bytes()), kind))
            }),
            _ => None,
        };
        let artifact_hex = fingerprint.filter(|_| matches!(state, StageState::Succeeded)).map(Fingerprint::to_hex);

        let _ = self
            .registry
            .update(id, move |job| {
                if let Some(status) = job.stages.get_mut(&stage) {
                    status.ended_at = Some(now);
                    status.attempt_count += 1;
                    status.state = state;
                    status.last_error_kind = err_kind;
                    status.artifact_fingerprint = artifact_hex;
                }
                if let Some((stage, artifact_ref)) = artifact_entry {
                    job.artifacts.insert(stage, artifact_ref);
                }
            })
            .await;
    }

    async fn finalize(&self, id: JobId, result: Result<VideoArtifact, PipelineError>) {
        match result {
            Ok(_video) => {
                let _ = self
                    .registry
                    .update(id, move |job| {
                        job.state = JobState::Succeeded;
                        job.result_url = Some(format!("/pipeline/results/{id}"));
                    })
                    .await;
            }
            Err(err) => {
                let state = if err.is_cancelled() {
                    JobState::Cancelled
                } else {
                    JobState::Failed
                };
                let _ = self
                    .registry
                    .update(id, move |job| {
                        job.state = state;
                        job.error = Some(err);
                    })
                    .await;
            }
        }
    }
}

fn artifact_kind_for(stage: StageKind) -> Option<ArtifactKind> {
    match stage {
        StageKind::PersonDetection => Some(ArtifactKind::Detections),
        StageKind::BackgroundRemoval => Some(ArtifactKind::Mask),
        StageKind::TtsSynthesis => Some(ArtifactKind::Audio),
        StageKind::Prosody => Some(ArtifactKind::ProsodyAudio),
        StageKind::TalkingHead | StageKind::BgmMix => None,
    }
}

fn validate_request(request: &JobRequest, has_audio_override: bool) -> Result<(), PipelineError> {
    request.detector.validate()?;
    match (&request.tts, has_audio_override) {
        (Some(tts), false) => tts.validate()?,
        (None, true) => {}
        (Some(_), true) => {
            return Err(PipelineError::invalid_input(
                "provide either tts parameters or an audio upload, not both",
            ))
        }
        (None, false) => {
            return Err(PipelineError::invalid_input(
                "tts parameters are required when no audio is uploaded",
            ))
        }
    }
    if let Some(prosody) = &request.prosody {
        prosody.validate()?;
    }
    if let Some(bgm) = &request.bgm {
        bgm.validate()?;
    }
    Ok(())
}

/// Await both branch handles, cancelling the sibling branch's token as soon
/// as one side fails: the merge is a barrier plus cooperative cancellation
/// on partial failure. Both handles are always awaited to completion
/// before returning.
async fn race_branches<A, B>(
    mut handle_a: JoinHandle<Result<A, PipelineError>>,
    mut handle_b: JoinHandle<Result<B, PipelineError>>,
    cancel_a: &CancellationToken,
    cancel_b: &CancellationToken,
) -> (Result<A, PipelineError>, Result<B, PipelineError>)
where
    A: Send + 'static,
    B: Send + 'static,
{
    tokio::select! {
        joined_a = &mut handle_a => {
            let result_a = joined_a.unwrap_or_else(|e| Err(PipelineError::internal(format!("image branch task panicked: {e}"))));
            if result_a.is_err() {
                cancel_b.cancel();
            }
            let result_b = handle_b.await.unwrap_or_else(|e| Err(PipelineError::internal(format!("audio branch task panicked: {e}"))));
            (result_a, result_b)
        }
        joined_b = &mut handle_b => {
            let result_b = joined_b.unwrap_or_else(|e| Err(PipelineError::internal(format!("audio branch task panicked: {e}"))));
            if result_b.is_err() {
                cancel_a.cancel();
            }
            let result_a = handle_a.await.unwrap_or_else(|e| Err(PipelineError::internal(format!("image branch task panicked: {e}"))));
            (result_a, result_b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_core::domain::{BgmParams, ProsodyPreset, VideoQuality, VoiceSelector};
    use video_operators::backends::{FakeBackgroundRemover, FakeBgmAssets, FakePersonDetector, FakeTts};
    use video_operators::postprocess::RawDetection;
    use video_prosody::ProsodyMeasurement;
    use video_talkinghead::client::PollOutcome;
    use async_trait::async_trait;

    struct FakeProsody;

    #[async_trait]
    impl ProsodyBackend for FakeProsody {
        async fn adjust(
            &self,
            audio: &AudioArtifact,
            _pitch_shift: f32,
            _tempo_shift: f32,
            _energy_shift: f32,
        ) -> Result<(AudioArtifact, ProsodyMeasurement), PipelineError> {
            Ok((
                audio.clone(),
                ProsodyMeasurement {
                    pitch_ratio: 1.0,
                    tempo_ratio: 1.0,
                    peak_amplitude: 0.5,
                },
            ))
        }
    }

    struct InstantTalkingHead;

    #[async_trait]
    impl TalkingHeadBackend for InstantTalkingHead {
        async fn submit(
            &self,
            _image: &ImageArtifact,
            _audio: &AudioArtifact,
            _quality: VideoQuality,
        ) -> Result<ProviderTaskId, PipelineError> {
            Ok(ProviderTaskId::new("task-1"))
        }

        async fn poll(&self, _task_id: &ProviderTaskId) -> Result<PollOutcome, PipelineError> {
            Ok(PollOutcome::Ready(VideoArtifact {
                bytes: vec![1, 2, 3],
                duration_ms: 500,
                container: "mp4".to_string(),
            }))
        }
    }

    fn model_specs() -> HashMap<ModelId, ModelSpec> {
        let mut specs = HashMap::new();
        for name in ["person-detector", "background-remover", "tts", "prosody"] {
            specs.insert(
                ModelId::new(name),
                ModelSpec {
                    vram_cost_mb: 100,
                    max_concurrency: 4,
                },
            );
        }
        specs
    }

    fn orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            10_000_000,
            10_000,
            model_specs(),
            Arc::new(FakePersonDetector {
                detections: vec![RawDetection {
                    bbox: video_core::domain::BBox {
                        x_min: 0.0,
                        y_min: 0.0,
                        x_max: 10.0,
                        y_max: 10.0,
                    },
                    confidence: 0.9,
                    keypoints: None,
                }],
            }),
            Arc::new(FakeBackgroundRemover),
            Arc::new(FakeTts),
            Arc::new(FakeProsody),
            Arc::new(FakeBgmAssets { track_duration_ms: 2000 }),
            Arc::new(InstantTalkingHead),
        )
    }

    fn sample_request(prosody: bool, bgm: bool) -> JobRequest {
        JobRequest {
            detector: PersonDetectorParams::default(),
            background: BackgroundRemoverParams::default(),
            tts: Some(TtsParams {
                text: "hello there".to_string(),
                voice: VoiceSelector::Preset { id: "narrator".to_string() },
                speed: 1.0,
                pitch: 1.0,
                intonation: 1.0,
                volume: 1.0,
            }),
            prosody: prosody.then_some(ProsodyParams::Preset(ProsodyPreset::Neutral)),
            bgm: bgm.then_some(BgmParams {
                bgm_id: "track-1".to_string(),
                bgm_gain_db: -6.0,
                duck_ratio: 0.5,
            }),
            smoothing: true,
            video_quality: VideoQuality::Standard,
        }
    }

    fn sample_input() -> JobInput {
        JobInput {
            image_ref: ArtifactId::from_digest([9u8; 32]),
            image: ImageArtifact {
                bytes: vec![0u8; 100 * 100],
                width: 100,
                height: 100,
                has_alpha: false,
            },
            audio: None,
        }
    }

    #[tokio::test]
    async fn full_pipeline_succeeds_and_reaches_a_terminal_state() {
        let orchestrator = orchestrator();
        let id = orchestrator
            .submit(ClientFingerprint::new("c1"), sample_request(true, true), sample_input())
            .await
            .unwrap();

        for _ in 0..200 {
            let job = orchestrator.status(id).await.unwrap();
            if job.state.is_terminal() {
                assert_eq!(job.state, JobState::Succeeded);
                assert!(job.result_url.is_some());
                assert!(job.artifacts.contains_key(&StageKind::PersonDetection));
                assert!(job.artifacts.contains_key(&StageKind::TtsSynthesis));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn missing_tts_params_and_no_audio_upload_is_rejected_at_submission() {
        let orchestrator = orchestrator();
        let mut request = sample_request(false, false);
        request.tts = None;
        let result = orchestrator
            .submit(ClientFingerprint::new("c2"), request, sample_input())
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn uploaded_audio_bypasses_tts_and_skips_that_stage() {
        let orchestrator = orchestrator();
        let mut request = sample_request(false, false);
        request.tts = None;
        let mut input = sample_input();
        input.audio = Some(AudioArtifact {
            bytes: vec![0u8; 4096],
            sample_rate_hz: 22_050,
            duration_ms: 1000,
        });

        let id = orchestrator
            .submit(ClientFingerprint::new("c6"), request, input)
            .await
            .unwrap();
        let job = wait_for_terminal(&orchestrator, id).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.stages[&StageKind::TtsSynthesis].state, StageState::Skipped);
        assert!(!job.artifacts.contains_key(&StageKind::TtsSynthesis));
    }

    #[tokio::test]
    async fn cancel_before_completion_yields_cancelled_state() {
        let orchestrator = orchestrator();
        let id = orchestrator
            .submit(ClientFingerprint::new("c3"), sample_request(false, false), sample_input())
            .await
            .unwrap();
        orchestrator.cancel(id).await;

        for _ in 0..200 {
            let job = orchestrator.status(id).await.unwrap();
            if job.state.is_terminal() {
                assert!(matches!(job.state, JobState::Cancelled | JobState::Succeeded));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn cache_is_reused_across_jobs_with_identical_inputs() {
        let orchestrator = orchestrator();
        let request = sample_request(false, false);
        let input = sample_input();

        let id1 = orchestrator
            .submit(ClientFingerprint::new("c4"), request.clone(), input.clone())
            .await
            .unwrap();
        wait_for_terminal(&orchestrator, id1).await;

        let id2 = orchestrator
            .submit(ClientFingerprint::new("c5"), request, input)
            .await
            .unwrap();
        let job2 = wait_for_terminal(&orchestrator, id2).await;
        assert_eq!(job2.state, JobState::Succeeded);
        assert!(orchestrator.metrics().cache_hit_ratio() > 0.0);
    }

    async fn wait_for_terminal(orchestrator: &PipelineOrchestrator, id: JobId) -> Job {
        for _ in 0..200 {
            let job = orchestrator.status(id).await.unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }
}
