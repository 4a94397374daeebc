//! Recognized configuration options, assembled into the typed structs the
//! rest of the crate consumes: one struct per concern, a constructor that
//! validates, no dynamic config dicts.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};

use video_admission::ModelSpec;
use video_core::ids::ModelId;

/// CORS policy for the HTTP surface.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (local development).
    #[default]
    AllowAll,
    /// Allow only the listed origins.
    AllowOrigins(Vec<String>),
}

/// The pipeline-facing subset of the recognized options: everything that
/// feeds the cache, admission controller, rate limiter, and job retention
/// policy.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache_byte_budget: usize,
    pub gpu_vram_budget_mb: u32,
    pub model_vram_costs: HashMap<String, u32>,
    pub model_concurrency: HashMap<String, u32>,
    pub job_retention: Duration,
    pub rate_per_min: u32,
    pub rate_burst: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_byte_budget: 512 * 1024 * 1024,
            gpu_vram_budget_mb: 8_000,
            model_vram_costs: HashMap::new(),
            model_concurrency: HashMap::new(),
            job_retention: Duration::from_secs(3600),
            rate_per_min: 30,
            rate_burst: 5,
        }
    }
}

impl PipelineConfig {
    /// Reject out-of-range values before anything is wired up.
    pub fn validate(&self) -> Result<()> {
        if self.cache_byte_budget == 0 {
            bail!("cache_byte_budget must be positive");
        }
        if self.gpu_vram_budget_mb == 0 {
            bail!("gpu_vram_budget_mb must be positive");
        }
        for (model, cost) in &self.model_vram_costs {
            if !self.model_concurrency.contains_key(model) {
                bail!("model '{model}' declares a vram cost ({cost} MB) but no concurrency limit");
            }
        }
        if self.rate_per_min == 0 || self.rate_burst == 0 {
            bail!("rate_per_min and rate_burst must be positive");
        }
        Ok(())
    }

    /// Build the `(ModelId -> ModelSpec)` map the admission controller
    /// expects out of the two flat option maps.
    #[must_use]
    pub fn model_specs(&self) -> HashMap<ModelId, ModelSpec> {
        self.model_vram_costs
            .iter()
            .filter_map(|(model, &vram_cost_mb)| {
                self.model_concurrency.get(model).map(|&max_concurrency| {
                    (
                        ModelId::new(model.clone()),
                        ModelSpec {
                            vram_cost_mb,
                            max_concurrency,
                        },
                    )
                })
            })
            .collect()
    }
}

/// Talking-head provider wiring: `provider_base_url`, `provider_api_key`,
/// `webhook_url`. Kept separate from
/// [`PipelineConfig`] since it is credentials, not capacity accounting.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_url: String,
}

/// Top-level server configuration, including the HTTP-only `port`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors: CorsConfig,
    pub pipeline: PipelineConfig,
    pub provider: ProviderConfig,
    /// How often the reaper sweeps for terminal jobs older than
    /// `pipeline.job_retention`.
    pub reap_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors: CorsConfig::default(),
            pipeline: PipelineConfig::default(),
            provider: ProviderConfig::default(),
            reap_period: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()
    }
}
