//! Shared application state type: handlers take `State<AppState>` and never
//! see the orchestrator's internals directly.

use std::sync::Arc;

use video_metrics::RateLimiter;
use video_orchestrator::PipelineOrchestrator;

/// Everything a handler needs, shared across the whole server.
pub struct HttpContext {
    pub orchestrator: PipelineOrchestrator,
    pub rate_limiter: RateLimiter,
}

/// Application state shared across all handlers.
pub type AppState = Arc<HttpContext>;
