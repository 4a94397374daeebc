//! Black-box backend traits for each ML/TTS collaborator.
//!
//! The operators in this crate depend only on these traits, never on a
//! concrete model runtime. Each trait ships a deterministic in-memory fake
//! alongside it so operator logic (retry, postprocessing, validation) can be
//! unit tested without a real model.

use async_trait::async_trait;

use video_core::domain::{AudioArtifact, ImageArtifact};
use video_core::error::PipelineError;

use crate::postprocess::RawDetection;

/// Person-detection model backend.
#[async_trait]
pub trait PersonDetectorBackend: Send + Sync {
    async fn detect(&self, image: &ImageArtifact) -> Result<Vec<RawDetection>, PipelineError>;
}

/// Background-removal model backend. Returns an RGBA mask-image
/// the same dimensions as the input; the operator itself applies the
/// smoothing pass.
#[async_trait]
pub trait BackgroundRemoverBackend: Send + Sync {
    async fn remove_background(&self, image: &ImageArtifact) -> Result<ImageArtifact, PipelineError>;
}

/// Text-to-speech backend.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &video_core::domain::VoiceSelector,
        speed: f32,
        pitch: f32,
        intonation: f32,
        volume: f32,
    ) -> Result<AudioArtifact, PipelineError>;
}

/// Fixed, deterministic fake detector for tests and local development.
pub struct FakePersonDetector {
    pub detections: Vec<RawDetection>,
}

#[async_trait]
impl PersonDetectorBackend for FakePersonDetector {
    async fn detect(&self, _image: &ImageArtifact) -> Result<Vec<RawDetection>, PipelineError> {
        Ok(self.detections.clone())
    }
}

/// Fake background remover: returns the input unmodified but alpha-tagged,
/// for use in tests.
pub struct FakeBackgroundRemover;

#[async_trait]
impl BackgroundRemoverBackend for FakeBackgroundRemover {
    async fn remove_background(&self, image: &ImageArtifact) -> Result<ImageArtifact, PipelineError> {
        Ok(ImageArtifact {
            bytes: image.bytes.clone(),
            width: image.width,
            height: image.height,
            has_alpha: true,
        })
    }
}

/// Background-music asset lookup: resolves a `bgm_id` to its
/// pre-mastered audio track. Kept as a separate black-box trait since the
/// asset library is a content store, not an ML model.
#[async_trait]
pub trait BgmAssetBackend: Send + Sync {
    async fn load(&self, bgm_id: &str) -> Result<AudioArtifact, PipelineError>;
}

/// Fake asset backend returning a fixed-length silent track for any id.
pub struct FakeBgmAssets {
    pub track_duration_ms: u64,
}

#[async_trait]
impl BgmAssetBackend for FakeBgmAssets {
    async fn load(&self, bgm_id: &str) -> Result<AudioArtifact, PipelineError> {
        if bgm_id.is_empty() {
            return Err(PipelineError::not_found("unknown bgm_id"));
        }
        const SAMPLE_RATE_HZ: u32 = 22_050;
        let sample_count = (SAMPLE_RATE_HZ as u64 * self.track_duration_ms / 1000) as usize;
        Ok(AudioArtifact {
            bytes: vec![128u8; sample_count * 2],
            sample_rate_hz: SAMPLE_RATE_HZ,
            duration_ms: self.track_duration_ms,
        })
    }
}

/// Fake TTS backend: synthesizes a fixed-duration silent buffer sized
/// proportionally to the input text length, as 16-bit PCM mono at 22.05kHz.
pub struct FakeTts;

#[async_trait]
impl TtsBackend for FakeTts {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &video_core::domain::VoiceSelector,
        _speed: f32,
        _pitch: f32,
        _intonation: f32,
        _volume: f32,
    ) -> Result<AudioArtifact, PipelineError> {
        const SAMPLE_RATE_HZ: u32 = 22_050;
        let duration_ms = (text.chars().count() as u64 * 60).max(200);
        let sample_count = (SAMPLE_RATE_HZ as u64 * duration_ms / 1000) as usize;
        Ok(AudioArtifact {
            bytes: vec![0u8; sample_count * 2],
            sample_rate_hz: SAMPLE_RATE_HZ,
            duration_ms,
        })
    }
}
