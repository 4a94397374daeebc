//! Pipeline error taxonomy: a single serializable enum with no foreign
//! error types in its signature, paired with `is_retriable`/`is_cancelled`
//! predicates and a `user_message` suitable for an HTTP error envelope, as
//! distinct from the `Display` impl used for logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for pipeline operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failure at a public boundary (submission, webhook, params).
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Human-readable detail.
        message: String,
    },

    /// Submission rejected by the token-bucket rate limiter.
    #[error("rate limited")]
    RateLimited {
        /// Seconds the client should wait before retrying.
        retry_after_secs: u64,
    },

    /// GPU/VRAM/cache capacity could not be obtained in time.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Human-readable detail.
        message: String,
    },

    /// The external talking-head provider (or another upstream) failed.
    #[error("upstream failed: {message}")]
    UpstreamFailed {
        /// Human-readable detail.
        message: String,
        /// HTTP status code if the failure came from an HTTP call.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// A stage or the overall job exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout {
        /// Human-readable detail.
        message: String,
    },

    /// The job or stage was cancelled (user-initiated or deadline-forced).
    #[error("cancelled")]
    Cancelled,

    /// An internal error classified as retriable (transient network blip,
    /// GPU OOM signalled by the underlying device, etc).
    #[error("transient error: {message}")]
    Transient {
        /// Human-readable detail.
        message: String,
    },

    /// A requested entity does not exist (or has expired).
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable detail.
        message: String,
    },

    /// Unexpected internal error; details are logged, not surfaced to users.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable detail (safe to log, not safe to show a client).
        message: String,
    },
}

impl PipelineError {
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn upstream_failed(message: impl Into<String>) -> Self {
        Self::UpstreamFailed {
            message: message.into(),
            status_code: None,
        }
    }

    #[must_use]
    pub fn upstream_failed_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::UpstreamFailed {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether an operator/stage retry loop should retry this error.
    ///
    /// `Transient` and `Timeout` are always retriable. `UpstreamFailed` is
    /// retriable only when it carries no status code (a network-level
    /// failure) or a 5xx: 4xx upstream failures are fatal (429 has its own
    /// `RateLimited` variant, so any 4xx reaching here is a real client-side
    /// rejection, not something a retry can fix). Validation and
    /// confidence-style failures are never retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => true,
            Self::UpstreamFailed { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code >= 500,
            },
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The stable `code` field for the error envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            Self::UpstreamFailed { .. } => "UPSTREAM_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Transient { .. } => "INTERNAL",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// User-facing message for the error envelope; never leaks internal
    /// detail for `Internal`/`Transient` variants.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput { message } => message.clone(),
            Self::RateLimited { retry_after_secs } => {
                format!("Too many requests; retry after {retry_after_secs}s")
            }
            Self::ResourceExhausted { .. } => {
                "The server is at capacity; please retry shortly".to_string()
            }
            Self::UpstreamFailed { .. } => "The upstream provider failed".to_string(),
            Self::Timeout { .. } => "The operation timed out".to_string(),
            Self::Cancelled => "The job was cancelled".to_string(),
            Self::Transient { .. } | Self::Internal { .. } => {
                "An internal error occurred".to_string()
            }
            Self::NotFound { message } => message.clone(),
        }
    }
}

/// Convenience result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
