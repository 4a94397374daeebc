//! Text-to-speech synthesis operator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use video_core::domain::{AudioArtifact, TtsParams};
use video_core::error::PipelineError;
use video_core::fingerprint::{Fingerprint, FingerprintBuilder, ParamValue};
use video_core::ids::{ModelId, OperatorVersion};
use video_core::ports::StageOperator;
use video_core::retry::{with_retry, RetryPolicy};

use crate::backends::TtsBackend;

/// Preferred output format: 16-bit PCM mono, 22.05kHz.
const EXPECTED_SAMPLE_RATE_HZ: u32 = 22_050;

pub struct TtsSynthesizer {
    backend: Arc<dyn TtsBackend>,
    retry_policy: RetryPolicy,
}

impl TtsSynthesizer {
    #[must_use]
    pub fn new(backend: Arc<dyn TtsBackend>) -> Self {
        Self {
            backend,
            retry_policy: RetryPolicy::operator_default(),
        }
    }
}

#[async_trait]
impl StageOperator for TtsSynthesizer {
    type Input = ();
    type Params = TtsParams;
    type Output = AudioArtifact;

    fn operator_id(&self) -> &'static str {
        "tts_synthesizer"
    }

    fn version(&self) -> OperatorVersion {
        OperatorVersion(1)
    }

    fn model(&self) -> Option<ModelId> {
        Some(ModelId::new("tts"))
    }

    fn cache_ttl_secs(&self) -> Option<u64> {
        Some(3600)
    }

    fn fingerprint(&self, (): &Self::Input, params: &Self::Params) -> Fingerprint {
        let (voice_tag, voice_id) = match &params.voice {
            video_core::domain::VoiceSelector::Preset { id } => ("preset", id.clone()),
            video_core::domain::VoiceSelector::Clone { profile_id } => ("clone", profile_id.clone()),
        };
        FingerprintBuilder::new(self.operator_id(), self.version())
            .with_param("text", &ParamValue::Str(params.text.clone()))
            .with_param("voice_tag", &ParamValue::Str(voice_tag.to_string()))
            .with_param("voice_id", &ParamValue::Str(voice_id))
            .with_param("speed", &ParamValue::Float(f64::from(params.speed)))
            .with_param("pitch", &ParamValue::Float(f64::from(params.pitch)))
            .with_param("intonation", &ParamValue::Float(f64::from(params.intonation)))
            .with_param("volume", &ParamValue::Float(f64::from(params.volume)))
            .finish()
    }

    async fn execute(
        &self,
        (): Self::Input,
        params: Self::Params,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError> {
        params.validate()?;

        let audio = with_retry(self.retry_policy, cancel, |_attempt| {
            let backend = Arc::clone(&self.backend);
            let params = params.clone();
            async move {
                backend
                    .synthesize(
                        &params.text,
                        &params.voice,
                        params.speed,
                        params.pitch,
                        params.intonation,
                        params.volume,
                    )
                    .await
            }
        })
        .await?;

        if audio.sample_rate_hz != EXPECTED_SAMPLE_RATE_HZ {
            tracing::warn!(
                sample_rate_hz = audio.sample_rate_hz,
                "tts backend returned unexpected sample rate"
            );
        }

        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FakeTts;
    use video_core::domain::VoiceSelector;

    fn params(text: &str) -> TtsParams {
        TtsParams {
            text: text.to_string(),
            voice: VoiceSelector::Preset {
                id: "default".to_string(),
            },
            speed: 1.0,
            pitch: 1.0,
            intonation: 1.0,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn synthesizes_audio_at_the_expected_sample_rate() {
        let op = TtsSynthesizer::new(Arc::new(FakeTts));
        let cancel = CancellationToken::new();
        let out = op.execute((), params("hello there"), &cancel).await.unwrap();
        assert_eq!(out.sample_rate_hz, EXPECTED_SAMPLE_RATE_HZ);
        assert!(out.duration_ms > 0);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let op = TtsSynthesizer::new(Arc::new(FakeTts));
        let cancel = CancellationToken::new();
        let err = op.execute((), params(""), &cancel).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn overlong_text_is_rejected() {
        let op = TtsSynthesizer::new(Arc::new(FakeTts));
        let long = "a".repeat(101);
        let cancel = CancellationToken::new();
        let err = op.execute((), params(&long), &cancel).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn fingerprint_is_stable_for_identical_params() {
        let op = TtsSynthesizer::new(Arc::new(FakeTts));
        let p = params("same text");
        assert_eq!(op.fingerprint(&(), &p), op.fingerprint(&(), &p));
    }
}
