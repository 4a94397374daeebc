//! HTTP-facing error type and the error envelope: a `thiserror` enum with
//! one `IntoResponse` impl that maps each variant to a status code and a
//! JSON body, plus `From` conversions from the domain error types so
//! handlers can just use `?`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use video_core::error::PipelineError;

#[derive(Debug, Error)]
pub enum PipelineHttpError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A multipart field exceeded its declared size bound (`image` <= 10
    /// MiB). Caught at the HTTP boundary, before a
    /// `PipelineError` is ever constructed, since it is a transport-layer
    /// concern rather than a domain validation failure.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// A multipart body was missing a required field or malformed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("job not found")]
    JobNotFound,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for PipelineHttpError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Pipeline(err) => (status_for(err), err.code(), err.user_message(), details_for(err)),
            Self::FileTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE", msg.clone(), None),
            Self::MalformedRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone(), None),
            Self::JobNotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", "job not found".to_string(), None),
        };

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code,
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        PipelineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::UpstreamFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Cancelled => StatusCode::CONFLICT,
        PipelineError::Transient { .. } | PipelineError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
    }
}

fn details_for(err: &PipelineError) -> Option<serde_json::Value> {
    match err {
        PipelineError::RateLimited { retry_after_secs } => {
            Some(serde_json::json!({ "retry_after_secs": retry_after_secs }))
        }
        _ => None,
    }
}
