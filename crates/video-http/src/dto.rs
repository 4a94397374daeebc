//! Request/response bodies for the pipeline HTTP surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use video_core::domain::{BgmParams, Job, ProsodyParams, StageKind, StageState, VideoQuality, VoiceSelector};
use video_core::error::PipelineError;
use video_core::ids::JobId;

/// Response body for a successful `POST /pipeline/generate`.
#[derive(Serialize)]
pub struct GenerateResponse {
    pub task_id: String,
    pub status: &'static str,
    pub poll_url: String,
}

impl GenerateResponse {
    #[must_use]
    pub fn for_job(id: JobId) -> Self {
        Self {
            task_id: id.to_string(),
            status: "processing",
            poll_url: format!("/pipeline/status/{id}"),
        }
    }
}

/// Per-stage status as surfaced at the status endpoint.
#[derive(Serialize)]
pub struct StageStatusDto {
    pub state: StageState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
}

#[derive(Serialize)]
pub struct ErrorDto {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ErrorDto {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.code(),
            message: err.user_message(),
        }
    }
}

/// `GET /pipeline/status/{task_id}` response body.
#[derive(Serialize)]
pub struct StatusResponse {
    pub state: String,
    pub per_stage_status: BTreeMap<StageKind, StageStatusDto>,
    pub progress_pct: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDto>,
}

impl From<&Job> for StatusResponse {
    fn from(job: &Job) -> Self {
        let updated_at = job
            .stages
            .values()
            .filter_map(|s| s.ended_at.or(s.started_at))
            .max()
            .unwrap_or(job.submitted_at);

        Self {
            state: format!("{:?}", job.state),
            per_stage_status: job
                .stages
                .iter()
                .map(|(stage, status)| {
                    (
                        *stage,
                        StageStatusDto {
                            state: status.state,
                            started_at: status.started_at,
                            ended_at: status.ended_at,
                            attempt_count: status.attempt_count,
                        },
                    )
                })
                .collect(),
            progress_pct: job.progress_pct(),
            created_at: job.submitted_at,
            updated_at,
            result_url: job.result_url.clone(),
            error: job.error.as_ref().map(ErrorDto::from),
        }
    }
}

/// `DELETE /pipeline/tasks/{task_id}` response body: a terminal state
/// promise, returned unconditionally (idempotent cancel).
#[derive(Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub status: &'static str,
}

/// Voice selector as received over the wire: `{provider, id|profile_id}`.
#[derive(Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum VoiceSelectorDto {
    Preset { id: String },
    Clone { profile_id: String },
}

impl From<VoiceSelectorDto> for VoiceSelector {
    fn from(dto: VoiceSelectorDto) -> Self {
        match dto {
            VoiceSelectorDto::Preset { id } => Self::Preset { id },
            VoiceSelectorDto::Clone { profile_id } => Self::Clone { profile_id },
        }
    }
}

/// The non-file multipart fields of `POST /pipeline/generate`, assembled
/// one part at a time as the handler walks the multipart body
/// (axum's `Multipart` extractor has no single-shot struct deserializer).
#[derive(Default)]
pub struct GenerateFields {
    pub text: Option<String>,
    pub voice: Option<VoiceSelectorDto>,
    pub prosody: Option<ProsodyParams>,
    pub bgm_id: Option<String>,
    pub bgm_gain_db: Option<f32>,
    pub duck_ratio: Option<f32>,
    pub smoothing: bool,
    pub video_quality: VideoQuality,
}

impl GenerateFields {
    #[must_use]
    pub fn bgm_params(&self) -> Option<BgmParams> {
        self.bgm_id.clone().map(|bgm_id| BgmParams {
            bgm_id,
            bgm_gain_db: self.bgm_gain_db.unwrap_or(-6.0),
            duck_ratio: self.duck_ratio.unwrap_or(0.5),
        })
    }
}

/// Talking-head provider webhook payload. The provider's actual wire shape
/// is implementation-defined; this is the shape `video-talkinghead`'s
/// reconciliation expects.
#[derive(Deserialize)]
pub struct WebhookPayload {
    pub provider_task_id: String,
    pub status: WebhookStatus,
    pub video_base64: Option<String>,
    pub duration_ms: Option<u64>,
    pub container: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Succeeded,
    Failed,
}
