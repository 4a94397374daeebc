//! Recognized parameter sets for stage operators and the submission
//! endpoint.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Parameters for [`crate::domain::StageKind::PersonDetection`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonDetectorParams {
    pub conf_threshold: f32,
    pub max_persons: u32,
    pub iou_threshold: f32,
    pub return_keypoints: bool,
}

impl Default for PersonDetectorParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            max_persons: 10,
            iou_threshold: 0.45,
            return_keypoints: false,
        }
    }
}

impl PersonDetectorParams {
    /// Validate against this operator's hard bounds.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(PipelineError::invalid_input(
                "conf_threshold must be in [0, 1]",
            ));
        }
        if !(1..=50).contains(&self.max_persons) {
            return Err(PipelineError::invalid_input(
                "max_persons must be in [1, 50]",
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(PipelineError::invalid_input(
                "iou_threshold must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Parameters for [`crate::domain::StageKind::BackgroundRemoval`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRemoverParams {
    pub smoothing: bool,
}

impl Default for BackgroundRemoverParams {
    fn default() -> Self {
        Self { smoothing: true }
    }
}

/// Which TTS provider a [`VoiceSelector`] targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum VoiceSelector {
    /// A built-in preset voice.
    Preset { id: String },
    /// A cloned-voice profile (OpenVoice-style cloning).
    Clone { profile_id: String },
}

/// Parameters for [`crate::domain::StageKind::TtsSynthesis`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TtsParams {
    pub text: String,
    pub voice: VoiceSelector,
    pub speed: f32,
    pub pitch: f32,
    pub intonation: f32,
    pub volume: f32,
}

impl TtsParams {
    /// Validate the text length bound (enforced upstream of the operator,
    /// but checked again here at the boundary).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.text.is_empty() {
            return Err(PipelineError::invalid_input("text must not be empty"));
        }
        if self.text.chars().count() > 100 {
            return Err(PipelineError::invalid_input(
                "text must be at most 100 characters",
            ));
        }
        Ok(())
    }
}

/// Named prosody presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProsodyPreset {
    Celebration,
    Energetic,
    Joyful,
    Calm,
    Neutral,
}

impl ProsodyPreset {
    /// `(pitch_shift, tempo_shift, energy_shift)` for this preset.
    #[must_use]
    pub const fn shifts(self) -> (f32, f32, f32) {
        match self {
            Self::Celebration => (1.15, 1.10, 1.20),
            Self::Energetic => (1.10, 1.15, 1.25),
            Self::Joyful => (1.20, 1.05, 1.15),
            Self::Calm => (0.95, 0.90, 0.85),
            Self::Neutral => (1.00, 1.00, 1.00),
        }
    }
}

/// Parameters for [`crate::domain::StageKind::Prosody`]: either a named
/// preset or explicit pitch/tempo/energy shifts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProsodyParams {
    Preset(ProsodyPreset),
    Explicit {
        pitch_shift: f32,
        tempo_shift: f32,
        energy_shift: f32,
    },
}

impl ProsodyParams {
    /// Resolve to concrete `(pitch, tempo, energy)` shifts.
    #[must_use]
    pub const fn shifts(&self) -> (f32, f32, f32) {
        match self {
            Self::Preset(p) => p.shifts(),
            Self::Explicit {
                pitch_shift,
                tempo_shift,
                energy_shift,
            } => (*pitch_shift, *tempo_shift, *energy_shift),
        }
    }

    /// Hard bounds: pitch in [0.90, 1.25], tempo in [0.95, 1.15], energy in
    /// [1.00, 1.30] (calm's 0.85 is mapped internally and bypasses this
    /// check when it comes from a preset).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if matches!(self, Self::Preset(_)) {
            return Ok(());
        }
        let (pitch, tempo, energy) = self.shifts();
        if !(0.90..=1.25).contains(&pitch) {
            return Err(PipelineError::invalid_input(
                "pitch_shift must be in [0.90, 1.25]",
            ));
        }
        if !(0.95..=1.15).contains(&tempo) {
            return Err(PipelineError::invalid_input(
                "tempo_shift must be in [0.95, 1.15]",
            ));
        }
        if !(1.00..=1.30).contains(&energy) {
            return Err(PipelineError::invalid_input(
                "energy_shift must be in [1.00, 1.30]",
            ));
        }
        Ok(())
    }
}

/// Parameters for the optional BGM mixing stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BgmParams {
    pub bgm_id: String,
    pub bgm_gain_db: f32,
    pub duck_ratio: f32,
}

impl BgmParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(-20.0..=0.0).contains(&self.bgm_gain_db) {
            return Err(PipelineError::invalid_input(
                "bgm_gain_db must be in [-20, 0]",
            ));
        }
        if !(0.3..=1.0).contains(&self.duck_ratio) {
            return Err(PipelineError::invalid_input(
                "duck_ratio must be in [0.3, 1.0]",
            ));
        }
        Ok(())
    }
}

/// Output quality tier requested at submission; mapping to provider-specific
/// parameters is implementation-defined and is resolved in
/// `video-talkinghead`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Draft,
    #[default]
    Standard,
    High,
}
