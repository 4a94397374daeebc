//! Prosody adjustment.
//!
//! Wraps a black-box prosody backend with a deterministic, multi-layer
//! confidence score and a mandatory safe fallback: a low-confidence or
//! outright failing adjustment never fails the job, it degrades to the
//! original audio untouched and never propagates a hard error to the
//! caller.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use video_core::domain::{ArtifactId, AudioArtifact, ProsodyAudioArtifact, ProsodyParams};
use video_core::error::PipelineError;
use video_core::fingerprint::{Fingerprint, FingerprintBuilder, ParamValue};
use video_core::ids::{ModelId, OperatorVersion};
use video_core::ports::StageOperator;
use video_core::retry::{with_retry, RetryPolicy};

/// Measured characteristics of a produced adjustment, used for confidence
/// scoring.
#[derive(Clone, Copy, Debug)]
pub struct ProsodyMeasurement {
    pub pitch_ratio: f32,
    pub tempo_ratio: f32,
    pub peak_amplitude: f32,
}

/// Black-box prosody adjustment backend.
#[async_trait]
pub trait ProsodyBackend: Send + Sync {
    async fn adjust(
        &self,
        audio: &AudioArtifact,
        pitch_shift: f32,
        tempo_shift: f32,
        energy_shift: f32,
    ) -> Result<(AudioArtifact, ProsodyMeasurement), PipelineError>;
}

/// Score a measurement against a deterministic penalty table: start at
/// 1.0, multiply by a per-layer penalty whenever a measured characteristic
/// falls outside its expected range.
#[must_use]
pub fn score_confidence(measurement: ProsodyMeasurement) -> f64 {
    let mut confidence = 1.0;
    if !(0.90..=1.25).contains(&measurement.pitch_ratio) {
        confidence *= 0.3;
    }
    if measurement.peak_amplitude > 0.99 {
        confidence *= 0.5;
    }
    if !(0.95..=1.15).contains(&measurement.tempo_ratio) {
        confidence *= 0.6;
    }
    confidence
}

/// Default acceptance predicate: accept if confidence >= 0.7.
#[must_use]
pub fn default_acceptance(confidence: f64, _measurement: ProsodyMeasurement) -> bool {
    confidence >= 0.7
}

pub struct ProsodyInput {
    pub audio_ref: ArtifactId,
    pub audio: AudioArtifact,
}

type AcceptancePredicate = dyn Fn(f64, ProsodyMeasurement) -> bool + Send + Sync;

pub struct ProsodyAdjuster {
    backend: Arc<dyn ProsodyBackend>,
    retry_policy: RetryPolicy,
    accept: Box<AcceptancePredicate>,
}

impl ProsodyAdjuster {
    #[must_use]
    pub fn new(backend: Arc<dyn ProsodyBackend>) -> Self {
        Self {
            backend,
            retry_policy: RetryPolicy::operator_default(),
            accept: Box::new(default_acceptance),
        }
    }

    /// Override the accept/reject predicate used after scoring, a
    /// pluggable `accept(confidence, details)` predicate.
    #[must_use]
    pub fn with_acceptance_predicate(
        mut self,
        predicate: impl Fn(f64, ProsodyMeasurement) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accept = Box::new(predicate);
        self
    }
}

#[async_trait]
impl StageOperator for ProsodyAdjuster {
    type Input = ProsodyInput;
    type Params = ProsodyParams;
    type Output = ProsodyAudioArtifact;

    fn operator_id(&self) -> &'static str {
        "prosody_adjuster"
    }

    fn version(&self) -> OperatorVersion {
        OperatorVersion(1)
    }

    fn model(&self) -> Option<ModelId> {
        Some(ModelId::new("prosody"))
    }

    fn cache_ttl_secs(&self) -> Option<u64> {
        Some(3600)
    }

    fn fingerprint(&self, input: &Self::Input, params: &Self::Params) -> Fingerprint {
        let (pitch, tempo, energy) = params.shifts();
        FingerprintBuilder::new(self.operator_id(), self.version())
            .with_input(input.audio_ref)
            .with_param("pitch_shift", &ParamValue::Float(f64::from(pitch)))
            .with_param("tempo_shift", &ParamValue::Float(f64::from(tempo)))
            .with_param("energy_shift", &ParamValue::Float(f64::from(energy)))
            .finish()
    }

    async fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError> {
        params.validate()?;
        let (pitch_shift, tempo_shift, energy_shift) = params.shifts();

        let outcome = with_retry(self.retry_policy, cancel, |_attempt| {
            let backend = Arc::clone(&self.backend);
            let audio = input.audio.clone();
            async move { backend.adjust(&audio, pitch_shift, tempo_shift, energy_shift).await }
        })
        .await;

        let (adjusted, measurement) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "prosody backend failed, falling back to original audio");
                return Ok(ProsodyAudioArtifact {
                    audio: input.audio,
                    confidence: 0.0,
                    was_fallback: true,
                });
            }
        };

        let confidence = score_confidence(measurement);
        if (self.accept)(confidence, measurement) {
            Ok(ProsodyAudioArtifact {
                audio: adjusted,
                confidence,
                was_fallback: false,
            })
        } else {
            Ok(ProsodyAudioArtifact {
                audio: input.audio,
                confidence,
                was_fallback: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend {
        measurement: ProsodyMeasurement,
    }

    #[async_trait]
    impl ProsodyBackend for FixedBackend {
        async fn adjust(
            &self,
            audio: &AudioArtifact,
            _pitch_shift: f32,
            _tempo_shift: f32,
            _energy_shift: f32,
        ) -> Result<(AudioArtifact, ProsodyMeasurement), PipelineError> {
            Ok((audio.clone(), self.measurement))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ProsodyBackend for FailingBackend {
        async fn adjust(
            &self,
            _audio: &AudioArtifact,
            _pitch_shift: f32,
            _tempo_shift: f32,
            _energy_shift: f32,
        ) -> Result<(AudioArtifact, ProsodyMeasurement), PipelineError> {
            Err(PipelineError::transient("vocoder unavailable"))
        }
    }

    fn audio() -> AudioArtifact {
        AudioArtifact {
            bytes: vec![1, 2, 3, 4],
            sample_rate_hz: 22_050,
            duration_ms: 100,
        }
    }

    fn input() -> ProsodyInput {
        ProsodyInput {
            audio_ref: ArtifactId::from_digest([1u8; 32]),
            audio: audio(),
        }
    }

    #[test]
    fn confidence_degrades_for_each_out_of_range_layer() {
        let in_range = ProsodyMeasurement {
            pitch_ratio: 1.0,
            tempo_ratio: 1.0,
            peak_amplitude: 0.5,
        };
        assert!((score_confidence(in_range) - 1.0).abs() < 1e-9);

        let bad_pitch = ProsodyMeasurement {
            pitch_ratio: 2.0,
            ..in_range
        };
        assert!((score_confidence(bad_pitch) - 0.3).abs() < 1e-9);

        let clipped = ProsodyMeasurement {
            peak_amplitude: 1.0,
            ..in_range
        };
        assert!((score_confidence(clipped) - 0.5).abs() < 1e-9);

        let all_bad = ProsodyMeasurement {
            pitch_ratio: 2.0,
            tempo_ratio: 2.0,
            peak_amplitude: 1.0,
        };
        assert!((score_confidence(all_bad) - 0.3 * 0.5 * 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn high_confidence_adjustment_is_accepted() {
        let op = ProsodyAdjuster::new(Arc::new(FixedBackend {
            measurement: ProsodyMeasurement {
                pitch_ratio: 1.0,
                tempo_ratio: 1.0,
                peak_amplitude: 0.5,
            },
        }));
        let cancel = CancellationToken::new();
        let out = op
            .execute(input(), ProsodyParams::Preset(video_core::domain::ProsodyPreset::Neutral), &cancel)
            .await
            .unwrap();
        assert!(!out.was_fallback);
        assert!((out.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn low_confidence_falls_back_to_original_audio() {
        let op = ProsodyAdjuster::new(Arc::new(FixedBackend {
            measurement: ProsodyMeasurement {
                pitch_ratio: 2.0,
                tempo_ratio: 2.0,
                peak_amplitude: 1.0,
            },
        }));
        let cancel = CancellationToken::new();
        let out = op
            .execute(input(), ProsodyParams::Preset(video_core::domain::ProsodyPreset::Neutral), &cancel)
            .await
            .unwrap();
        assert!(out.was_fallback);
        assert_eq!(out.audio, audio());
    }

    #[tokio::test]
    async fn backend_failure_degrades_instead_of_propagating() {
        let op = ProsodyAdjuster::new(Arc::new(FailingBackend));
        let cancel = CancellationToken::new();
        let out = op
            .execute(input(), ProsodyParams::Preset(video_core::domain::ProsodyPreset::Neutral), &cancel)
            .await
            .unwrap();
        assert!(out.was_fallback);
        assert_eq!(out.audio, audio());
    }

    #[tokio::test]
    async fn custom_acceptance_predicate_is_honored() {
        let op = ProsodyAdjuster::new(Arc::new(FixedBackend {
            measurement: ProsodyMeasurement {
                pitch_ratio: 1.0,
                tempo_ratio: 1.0,
                peak_amplitude: 0.5,
            },
        }))
        .with_acceptance_predicate(|_confidence, _m| false);
        let cancel = CancellationToken::new();
        let out = op
            .execute(input(), ProsodyParams::Preset(video_core::domain::ProsodyPreset::Neutral), &cancel)
            .await
            .unwrap();
        assert!(out.was_fallback);
    }
}
