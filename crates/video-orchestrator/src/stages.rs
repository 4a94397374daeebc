//! Per-stage execution: admission ticket, timeout, and cache wiring around
//! each [`StageOperator`]. Each function here owns exactly one node of the
//! DAG in `video_core::domain::Job::dag_stages`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use video_admission::{AdmissionError, GpuAdmissionController};
use video_cache::ResultCache;
use video_core::domain::{
    Artifact, ArtifactId, AudioArtifact, BackgroundRemoverParams, BgmParams, DetectionList,
    ImageArtifact, PersonDetectorParams, ProsodyAudioArtifact, ProsodyParams, StageKind, TtsParams,
};
use video_core::error::PipelineError;
use video_core::ports::StageOperator;
use video_metrics::StageMetrics;
use video_operators::{
    BackgroundRemovalInput, BackgroundRemover, BgmMixInput, BgmMixer, PersonDetectionInput,
    PersonDetector, TtsSynthesizer,
};
use video_prosody::{ProsodyAdjuster, ProsodyInput};

use crate::cache_flow::cached_stage;
use crate::content_id::content_artifact_id;

pub fn admission_to_pipeline_error(err: AdmissionError) -> PipelineError {
    match err {
        AdmissionError::DeadlineExceeded => {
            PipelineError::timeout("GPU admission wait exceeded the job deadline")
        }
        AdmissionError::Cancelled => PipelineError::Cancelled,
        AdmissionError::UnknownModel(model) => {
            PipelineError::internal(format!("admission controller has no spec for model {model}"))
        }
    }
}

/// Acquire an admission ticket for `stage`'s declared model (if any), run
/// `fut` under a per-stage timeout, and release the ticket before
/// returning, regardless of outcome.
async fn run_under_admission<Fut, T>(
    admission: &GpuAdmissionController,
    model: Option<video_core::ids::ModelId>,
    deadline: Instant,
    cancel: &CancellationToken,
    stage: StageKind,
    fut: Fut,
) -> Result<T, PipelineError>
where
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let ticket = match model {
        Some(model) => Some(
            admission
                .acquire(model, deadline, cancel)
                .await
                .map_err(admission_to_pipeline_error)?,
        ),
        None => None,
    };

    let timeout_dur = Duration::from_secs(stage.timeout_secs());
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = tokio::time::timeout(timeout_dur, fut) => result.unwrap_or_else(|_| {
            Err(PipelineError::timeout(format!("{stage:?} exceeded its stage timeout")))
        }),
    };
    drop(ticket);

    outcome
}

pub async fn run_person_detection(
    detector: &Arc<PersonDetector>,
    cache: &ResultCache,
    metrics: &StageMetrics,
    admission: &GpuAdmissionController,
    image_ref: ArtifactId,
    image: ImageArtifact,
    params: PersonDetectorParams,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<DetectionList, PipelineError> {
    let stage = StageKind::PersonDetection;
    let input = PersonDetectionInput { image_ref, image };
    let fp = detector.fingerprint(&input, &params);
    let ttl = detector.cache_ttl_secs();
    let model = detector.model();
    let start = Instant::now();

    let detector = Arc::clone(detector);
    let cancel = cancel.clone();
    let outcome = cached_stage(cache, metrics, stage, fp, ttl, move || async move {
        run_under_admission(admission, model, deadline, &cancel, stage, async {
            detector.execute(input, params, &cancel).await.map(Artifact::Detections)
        })
        .await
    })
    .await;

    metrics.record_stage(stage, start.elapsed(), outcome.is_ok());
    match outcome? {
        Artifact::Detections(list) => Ok(list),
        _ => Err(PipelineError::internal("cache returned the wrong artifact kind for person_detection")),
    }
}

pub async fn run_background_removal(
    remover: &Arc<BackgroundRemover>,
    cache: &ResultCache,
    metrics: &StageMetrics,
    admission: &GpuAdmissionController,
    image_ref: ArtifactId,
    image: ImageArtifact,
    params: BackgroundRemoverParams,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<ImageArtifact, PipelineError> {
    let stage = StageKind::BackgroundRemoval;
    let input = BackgroundRemovalInput { image_ref, image };
    let fp = remover.fingerprint(&input, &params);
    let ttl = remover.cache_ttl_secs();
    let model = remover.model();
    let start = Instant::now();

    let remover = Arc::clone(remover);
    let cancel = cancel.clone();
    let outcome = cached_stage(cache, metrics, stage, fp, ttl, move || async move {
        run_under_admission(admission, model, deadline, &cancel, stage, async {
            remover.execute(input, params, &cancel).await.map(Artifact::Mask)
        })
        .await
    })
    .await;

    metrics.record_stage(stage, start.elapsed(), outcome.is_ok());
    match outcome? {
        Artifact::Mask(image) => Ok(image),
        _ => Err(PipelineError::internal("cache returned the wrong artifact kind for background_removal")),
    }
}

pub async fn run_tts(
    tts: &Arc<TtsSynthesizer>,
    cache: &ResultCache,
    metrics: &StageMetrics,
    admission: &GpuAdmissionController,
    params: TtsParams,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<AudioArtifact, PipelineError> {
    let stage = StageKind::TtsSynthesis;
    let fp = tts.fingerprint(&(), &params);
    let ttl = tts.cache_ttl_secs();
    let model = tts.model();
    let start = Instant::now();

    let tts = Arc::clone(tts);
    let cancel = cancel.clone();
    let outcome = cached_stage(cache, metrics, stage, fp, ttl, move || async move {
        run_under_admission(admission, model, deadline, &cancel, stage, async {
            tts.execute((), params, &cancel).await.map(Artifact::Audio)
        })
        .await
    })
    .await;

    metrics.record_stage(stage, start.elapsed(), outcome.is_ok());
    match outcome? {
        Artifact::Audio(audio) => Ok(audio),
        _ => Err(PipelineError::internal("cache returned the wrong artifact kind for tts_synthesis")),
    }
}

pub async fn run_prosody(
    prosody: &Arc<ProsodyAdjuster>,
    cache: &ResultCache,
    metrics: &StageMetrics,
    admission: &GpuAdmissionController,
    audio: AudioArtifact,
    params: ProsodyParams,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<ProsodyAudioArtifact, PipelineError> {
    let stage = StageKind::Prosody;
    let audio_ref = content_artifact_id(&audio.bytes);
    let input = ProsodyInput { audio_ref, audio };
    let fp = prosody.fingerprint(&input, &params);
    let ttl = prosody.cache_ttl_secs();
    let model = prosody.model();
    let start = Instant::now();

    let prosody = Arc::clone(prosody);
    let cancel = cancel.clone();
    let outcome = cached_stage(cache, metrics, stage, fp, ttl, move || async move {
        run_under_admission(admission, model, deadline, &cancel, stage, async {
            prosody.execute(input, params, &cancel).await.map(Artifact::ProsodyAudio)
        })
        .await
    })
    .await;

    metrics.record_stage(stage, start.elapsed(), outcome.is_ok());
    match outcome? {
        Artifact::ProsodyAudio(p) => Ok(p),
        _ => Err(PipelineError::internal("cache returned the wrong artifact kind for prosody")),
    }
}

/// BGM mixing is never cached and declares no GPU model, so this skips
/// admission entirely and only applies the stage timeout.
pub async fn run_bgm(
    mixer: &Arc<BgmMixer>,
    metrics: &StageMetrics,
    speech: AudioArtifact,
    params: BgmParams,
    cancel: &CancellationToken,
) -> Result<AudioArtifact, PipelineError> {
    let stage = StageKind::BgmMix;
    let speech_ref = content_artifact_id(&speech.bytes);
    let input = BgmMixInput { speech_ref, speech };
    let start = Instant::now();

    let timeout_dur = Duration::from_secs(stage.timeout_secs());
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = tokio::time::timeout(timeout_dur, mixer.execute(input, params, cancel)) => {
            result.unwrap_or_else(|_| Err(PipelineError::timeout("BgmMix exceeded its stage timeout")))
        }
    };

    metrics.record_stage(stage, start.elapsed(), outcome.is_ok());
    outcome
}
