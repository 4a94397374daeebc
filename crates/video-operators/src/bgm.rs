//! Background-music mixing operator.
//!
//! Purely arithmetic over 16-bit PCM samples — no ML backend, just a
//! deterministic DSP pass, so it is never cached and carries no `model()`
//! admission cost.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use video_core::domain::{ArtifactId, AudioArtifact, BgmParams};
use video_core::error::PipelineError;
use video_core::fingerprint::{Fingerprint, FingerprintBuilder, ParamValue};
use video_core::ids::{ModelId, OperatorVersion};
use video_core::ports::StageOperator;

use crate::backends::BgmAssetBackend;

pub struct BgmMixInput {
    pub speech_ref: ArtifactId,
    pub speech: AudioArtifact,
}

pub struct BgmMixer {
    assets: Arc<dyn BgmAssetBackend>,
}

impl BgmMixer {
    #[must_use]
    pub fn new(assets: Arc<dyn BgmAssetBackend>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl StageOperator for BgmMixer {
    type Input = BgmMixInput;
    type Params = BgmParams;
    type Output = AudioArtifact;

    fn operator_id(&self) -> &'static str {
        "bgm_mixer"
    }

    fn version(&self) -> OperatorVersion {
        OperatorVersion(1)
    }

    fn model(&self) -> Option<ModelId> {
        None
    }

    fn cache_ttl_secs(&self) -> Option<u64> {
        None
    }

    fn fingerprint(&self, input: &Self::Input, params: &Self::Params) -> Fingerprint {
        FingerprintBuilder::new(self.operator_id(), self.version())
            .with_input(input.speech_ref)
            .with_param("bgm_id", &ParamValue::Str(params.bgm_id.clone()))
            .with_param("bgm_gain_db", &ParamValue::Float(f64::from(params.bgm_gain_db)))
            .with_param("duck_ratio", &ParamValue::Float(f64::from(params.duck_ratio)))
            .finish()
    }

    async fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        _cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError> {
        params.validate()?;

        let bgm = self.assets.load(&params.bgm_id).await?;
        let gain_linear = db_to_linear(params.bgm_gain_db) * f64::from(params.duck_ratio);
        let fitted_bgm = loop_or_truncate(&bgm.bytes, input.speech.bytes.len());
        let mixed = mix_pcm16(&input.speech.bytes, &fitted_bgm, gain_linear);

        Ok(AudioArtifact {
            bytes: mixed,
            sample_rate_hz: input.speech.sample_rate_hz,
            duration_ms: input.speech.duration_ms,
        })
    }
}

fn db_to_linear(db: f32) -> f64 {
    10f64.powf(f64::from(db) / 20.0)
}

/// Loop (repeating from the start) or truncate `bgm` so its byte length
/// equals `target_len`, matching the speech track's duration.
fn loop_or_truncate(bgm: &[u8], target_len: usize) -> Vec<u8> {
    if bgm.is_empty() || target_len == 0 {
        return vec![0u8; target_len];
    }
    let mut out = Vec::with_capacity(target_len);
    while out.len() < target_len {
        let remaining = target_len - out.len();
        out.extend_from_slice(&bgm[..remaining.min(bgm.len())]);
    }
    out
}

/// Sum two 16-bit PCM mono buffers sample-by-sample, scaling the second by
/// `gain`, clamping on overflow.
fn mix_pcm16(speech: &[u8], bgm: &[u8], gain: f64) -> Vec<u8> {
    let mut out = Vec::with_capacity(speech.len());
    for (s_chunk, b_chunk) in speech.chunks(2).zip(bgm.chunks(2)) {
        let s = read_i16(s_chunk);
        let b = read_i16(b_chunk);
        let mixed = f64::from(s) + f64::from(b) * gain;
        let clamped = mixed.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

fn read_i16(chunk: &[u8]) -> i16 {
    if chunk.len() == 2 {
        i16::from_le_bytes([chunk[0], chunk[1]])
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FakeBgmAssets;

    fn speech(duration_ms: u64) -> AudioArtifact {
        let sample_rate_hz = 22_050u32;
        let samples = (u64::from(sample_rate_hz) * duration_ms / 1000) as usize;
        AudioArtifact {
            bytes: vec![0u8; samples * 2],
            sample_rate_hz,
            duration_ms,
        }
    }

    #[tokio::test]
    async fn output_duration_matches_speech_duration() {
        let op = BgmMixer::new(Arc::new(FakeBgmAssets {
            track_duration_ms: 500,
        }));
        let speech = speech(2000);
        let input = BgmMixInput {
            speech_ref: ArtifactId::from_digest([9u8; 32]),
            speech: speech.clone(),
        };
        let params = BgmParams {
            bgm_id: "track-1".to_string(),
            bgm_gain_db: -6.0,
            duck_ratio: 0.5,
        };
        let cancel = CancellationToken::new();
        let out = op.execute(input, params, &cancel).await.unwrap();
        assert_eq!(out.bytes.len(), speech.bytes.len());
        assert_eq!(out.duration_ms, speech.duration_ms);
    }

    #[tokio::test]
    async fn shorter_bgm_loops_to_fill_speech_duration() {
        let op = BgmMixer::new(Arc::new(FakeBgmAssets {
            track_duration_ms: 100,
        }));
        let speech = speech(1000);
        let input = BgmMixInput {
            speech_ref: ArtifactId::from_digest([10u8; 32]),
            speech: speech.clone(),
        };
        let params = BgmParams {
            bgm_id: "track-2".to_string(),
            bgm_gain_db: 0.0,
            duck_ratio: 1.0,
        };
        let cancel = CancellationToken::new();
        let out = op.execute(input, params, &cancel).await.unwrap();
        assert_eq!(out.bytes.len(), speech.bytes.len());
    }

    #[tokio::test]
    async fn invalid_gain_is_rejected() {
        let op = BgmMixer::new(Arc::new(FakeBgmAssets {
            track_duration_ms: 100,
        }));
        let input = BgmMixInput {
            speech_ref: ArtifactId::from_digest([11u8; 32]),
            speech: speech(500),
        };
        let params = BgmParams {
            bgm_id: "track-3".to_string(),
            bgm_gain_db: 10.0,
            duck_ratio: 0.5,
        };
        let cancel = CancellationToken::new();
        let err = op.execute(input, params, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn mix_clamps_instead_of_wrapping() {
        let loud = i16::MAX.to_le_bytes().to_vec();
        let also_loud = i16::MAX.to_le_bytes().to_vec();
        let mixed = mix_pcm16(&loud, &also_loud, 1.0);
        assert_eq!(read_i16(&mixed), i16::MAX);
    }
}
