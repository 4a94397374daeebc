//! Rate limiting and pipeline metrics.

pub mod rate_limiter;
pub mod stage_metrics;

pub use rate_limiter::RateLimiter;
pub use stage_metrics::StageMetrics;
