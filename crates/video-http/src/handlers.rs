//! HTTP handlers for the pipeline surface.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;

use video_core::domain::{
    AudioArtifact, BackgroundRemoverParams, ImageArtifact, JobRequest, PersonDetectorParams,
    TtsParams, VideoArtifact,
};
use video_core::error::PipelineError;
use video_core::ids::{ClientFingerprint, JobId};
use video_orchestrator::content_id::content_artifact_id;
use video_orchestrator::JobInput;
use video_talkinghead::ProviderTaskId;

use crate::dto::{
    CancelResponse, GenerateFields, GenerateResponse, StatusResponse, WebhookPayload, WebhookStatus,
};
use crate::error::PipelineHttpError;
use crate::state::AppState;

/// Hard size bound on the `image` multipart field: 10 MiB.
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Fixed conservative retry window: the rate limiter doesn't expose the
/// exact time until its next token refills (the bucket refills at 0.5
/// tokens/sec, so a full token is never more than 2s away).
const RATE_LIMIT_RETRY_AFTER_SECS: u64 = 2;

/// `POST /pipeline/generate`: parse the multipart body, submit a job, and
/// return its id immediately.
pub async fn generate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<GenerateResponse>), PipelineHttpError> {
    let client = ClientFingerprint::new(addr.ip().to_string());
    if !state.rate_limiter.try_acquire(&client) {
        return Err(PipelineHttpError::Pipeline(PipelineError::rate_limited(
            RATE_LIMIT_RETRY_AFTER_SECS,
        )));
    }

    let (image_bytes, audio_bytes, fields) = collect_multipart(&mut multipart).await?;

    let image = decode_image(&image_bytes)?;
    let image_ref = content_artifact_id(&image_bytes);
    let audio = audio_bytes.map(|bytes| decode_audio(&bytes)).transpose()?;

    let tts = match (fields.text, fields.voice) {
        (Some(text), Some(voice)) => Some(TtsParams {
            text,
            voice: voice.into(),
            speed: 1.0,
            pitch: 1.0,
            intonation: 1.0,
            volume: 1.0,
        }),
        (None, None) => None,
        _ => {
            return Err(PipelineHttpError::MalformedRequest(
                "'text' and 'voice' must be provided together".to_string(),
            ))
        }
    };

    let request = JobRequest {
        detector: PersonDetectorParams::default(),
        background: BackgroundRemoverParams {
            smoothing: fields.smoothing,
        },
        tts,
        prosody: fields.prosody,
        bgm: fields.bgm_params(),
        smoothing: fields.smoothing,
        video_quality: fields.video_quality,
    };
    let input = JobInput {
        image_ref,
        image,
        audio,
    };

    let id = state.orchestrator.submit(client, request, input).await?;
    Ok((StatusCode::ACCEPTED, Json(GenerateResponse::for_job(id))))
}

async fn collect_multipart(
    multipart: &mut Multipart,
) -> Result<(Vec<u8>, Option<Vec<u8>>, GenerateFields), PipelineHttpError> {
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut fields = GenerateFields {
        smoothing: true,
        ..GenerateFields::default()
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineHttpError::MalformedRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineHttpError::MalformedRequest(e.to_string()))?;
                if bytes.len() > MAX_IMAGE_BYTES {
                    return Err(PipelineHttpError::FileTooLarge(format!(
                        "image exceeds {MAX_IMAGE_BYTES} bytes"
                    )));
                }
                image_bytes = Some(bytes.to_vec());
            }
            "audio" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineHttpError::MalformedRequest(e.to_string()))?;
                audio_bytes = Some(bytes.to_vec());
            }
            "text" => fields.text = Some(text_of(field).await?),
            "voice" => {
                let raw = text_of(field).await?;
                fields.voice = Some(
                    serde_json::from_str(&raw)
                        .map_err(|e| PipelineHttpError::MalformedRequest(format!("voice: {e}")))?,
                );
            }
            "prosody" => {
                let raw = text_of(field).await?;
                fields.prosody = Some(
                    serde_json::from_str(&raw)
                        .map_err(|e| PipelineHttpError::MalformedRequest(format!("prosody: {e}")))?,
                );
            }
            "bgm_id" => fields.bgm_id = Some(text_of(field).await?),
            "bgm_gain_db" => {
                fields.bgm_gain_db = Some(parse_field(&text_of(field).await?, "bgm_gain_db")?)
            }
            "duck_ratio" => {
                fields.duck_ratio = Some(parse_field(&text_of(field).await?, "duck_ratio")?)
            }
            "smoothing" => fields.smoothing = parse_field(&text_of(field).await?, "smoothing")?,
            "video_quality" => {
                let raw = text_of(field).await?;
                fields.video_quality = serde_json::from_value(serde_json::Value::String(raw))
                    .map_err(|e| {
                        PipelineHttpError::MalformedRequest(format!("video_quality: {e}"))
                    })?;
            }
            _ => {
                // Unrecognized field: drain it so the stream stays in sync.
                let _ = field.bytes().await;
            }
        }
    }

    let image_bytes =
        image_bytes.ok_or_else(|| PipelineHttpError::MalformedRequest("missing 'image' field".to_string()))?;
    Ok((image_bytes, audio_bytes, fields))
}

async fn text_of(field: axum::extract::multipart::Field<'_>) -> Result<String, PipelineHttpError> {
    field
        .text()
        .await
        .map_err(|e| PipelineHttpError::MalformedRequest(e.to_string()))
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, PipelineHttpError> {
    raw.parse()
        .map_err(|_| PipelineHttpError::MalformedRequest(format!("invalid value for '{name}'")))
}

fn decode_image(bytes: &[u8]) -> Result<ImageArtifact, PipelineHttpError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineHttpError::MalformedRequest(format!("image: {e}")))?;
    let has_alpha = matches!(
        img.color(),
        image::ColorType::La8 | image::ColorType::Rgba8 | image::ColorType::La16 | image::ColorType::Rgba16
    );
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(ImageArtifact {
        bytes: rgba.into_raw(),
        width,
        height,
        has_alpha,
    })
}

fn decode_audio(bytes: &[u8]) -> Result<AudioArtifact, PipelineHttpError> {
    let cursor = std::io::Cursor::new(bytes);
    let reader = hound::WavReader::new(cursor)
        .map_err(|e| PipelineHttpError::MalformedRequest(format!("audio: {e}")))?;
    let spec = reader.spec();
    let sample_rate_hz = spec.sample_rate;
    let duration_ms = u64::from(reader.duration()) * 1000 / u64::from(sample_rate_hz.max(1));
    Ok(AudioArtifact {
        bytes: bytes.to_vec(),
        sample_rate_hz,
        duration_ms,
    })
}

/// `GET /pipeline/status/{task_id}`.
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<StatusResponse>, PipelineHttpError> {
    let job = state
        .orchestrator
        .status(id)
        .await
        .ok_or(PipelineHttpError::JobNotFound)?;
    Ok(Json(StatusResponse::from(&job)))
}

/// `DELETE /pipeline/tasks/{task_id}`: idempotent, always `202`.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> (StatusCode, Json<CancelResponse>) {
    state.orchestrator.cancel(id).await;
    (
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            task_id: id.to_string(),
            status: "cancelling",
        }),
    )
}

/// `POST /webhooks/talking-head`: ack immediately, reconcile on a detached
/// task.
pub async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let task_id = ProviderTaskId::new(payload.provider_task_id);
        match payload.status {
            WebhookStatus::Succeeded => {
                let Some(b64) = payload.video_base64 else {
                    tracing::warn!(%task_id, "succeeded webhook missing video_base64");
                    return;
                };
                let bytes = match base64::engine::general_purpose::STANDARD.decode(b64) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(%task_id, error = %e, "webhook video_base64 did not decode");
                        return;
                    }
                };
                let artifact = VideoArtifact {
                    bytes,
                    duration_ms: payload.duration_ms.unwrap_or(0),
                    container: payload.container.unwrap_or_else(|| "mp4".to_string()),
                };
                orchestrator.deliver_webhook(&task_id, artifact);
            }
            WebhookStatus::Failed => {
                tracing::warn!(%task_id, error = ?payload.error_message, "talking-head provider reported failure");
            }
        }
    });
    StatusCode::OK
}
