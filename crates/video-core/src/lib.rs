//! Core domain types, error taxonomy, and shared port/retry machinery for
//! the video-message generation pipeline.
//!
//! Pure data types and trait definitions only: no I/O, no ML framework
//! types, no HTTP client types. Every other crate in the workspace depends
//! on this one; it depends on nothing else in the workspace.

pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod ports;
pub mod retry;

pub use error::{PipelineError, PipelineResult};
pub use ids::{ClientFingerprint, JobId, ModelId, OperatorVersion};
