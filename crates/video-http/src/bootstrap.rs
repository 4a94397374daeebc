//! Server bootstrap - the composition root: the only place where concrete
//! collaborators are wired together. This crate has no concrete ML/provider
//! adapters of its own to assemble - the pipeline operates against
//! black-box backends, so the caller supplies them via [`Backends`], the
//! same seam `PipelineOrchestrator::new` already exposes.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use video_operators::backends::{
    BackgroundRemoverBackend, BgmAssetBackend, PersonDetectorBackend, TtsBackend,
};
use video_orchestrator::PipelineOrchestrator;
use video_prosody::ProsodyBackend;
use video_talkinghead::client::TalkingHeadBackend;

use crate::config::ServerConfig;
use crate::state::HttpContext;

/// The black-box collaborators the orchestrator is built around. Assembled
/// by the caller - a binary's `main`, or a test - since this crate has no
/// opinion on which concrete adapters back them.
pub struct Backends {
    pub person_detector: Arc<dyn PersonDetectorBackend>,
    pub background_remover: Arc<dyn BackgroundRemoverBackend>,
    pub tts: Arc<dyn TtsBackend>,
    pub prosody: Arc<dyn ProsodyBackend>,
    pub bgm: Arc<dyn BgmAssetBackend>,
    pub talking_head: Arc<dyn TalkingHeadBackend>,
}

/// Wire the orchestrator, rate limiter, and reaper into an [`HttpContext`].
pub fn bootstrap(config: &ServerConfig, backends: Backends) -> Result<HttpContext> {
    config.validate()?;

    let orchestrator = PipelineOrchestrator::new(
        config.pipeline.cache_byte_budget,
        config.pipeline.gpu_vram_budget_mb,
        config.pipeline.model_specs(),
        backends.person_detector,
        backends.background_remover,
        backends.tts,
        backends.prosody,
        backends.bgm,
        backends.talking_head,
    );

    orchestrator.spawn_reaper(config.reap_period, config.pipeline.job_retention);

    Ok(HttpContext {
        orchestrator,
        rate_limiter: video_metrics::RateLimiter::new(),
    })
}

/// Bind and serve the HTTP surface until the process is terminated.
pub async fn start_server(config: ServerConfig, backends: Backends) -> Result<()> {
    let ctx = bootstrap(&config, backends)?;
    let app = crate::routes::router(Arc::new(ctx), &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "video-http listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
