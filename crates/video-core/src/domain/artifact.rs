//! Artifacts: immutable values produced by stage operators.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::detection::DetectionList;

/// Content-address of an [`Artifact`]: a SHA-256 digest of its producing
/// inputs plus operator version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub [u8; 32]);

impl ArtifactId {
    #[must_use]
    pub fn from_digest(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.to_hex())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Which kind of artifact a stage produces. Used to validate operator
/// input/output contracts without resorting to `Any`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Image,
    Audio,
    Detections,
    Mask,
    ProsodyAudio,
    Video,
}

/// A reference to an artifact owned by the result cache. Jobs hold these by
/// value; the cache owns the underlying bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
}

impl ArtifactRef {
    #[must_use]
    pub const fn new(id: ArtifactId, kind: ArtifactKind) -> Self {
        Self { id, kind }
    }
}

/// An RGB(A) image artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Whether the pixel buffer carries an alpha channel (mask output).
    pub has_alpha: bool,
}

/// A PCM audio artifact; 16-bit PCM mono at 22.05kHz is the preferred format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    pub sample_rate_hz: u32,
    pub duration_ms: u64,
}

/// Result of a prosody adjustment, wrapping the produced/fallback audio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProsodyAudioArtifact {
    pub audio: AudioArtifact,
    pub confidence: f64,
    pub was_fallback: bool,
}

/// The final rendered video artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
    pub container: String,
}

/// A produced value flowing through the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Artifact {
    Image(ImageArtifact),
    Audio(AudioArtifact),
    Detections(DetectionList),
    Mask(ImageArtifact),
    ProsodyAudio(ProsodyAudioArtifact),
    Video(VideoArtifact),
}

impl Artifact {
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::Image(_) => ArtifactKind::Image,
            Self::Audio(_) => ArtifactKind::Audio,
            Self::Detections(_) => ArtifactKind::Detections,
            Self::Mask(_) => ArtifactKind::Mask,
            Self::ProsodyAudio(_) => ArtifactKind::ProsodyAudio,
            Self::Video(_) => ArtifactKind::Video,
        }
    }

    /// Approximate in-memory size, used by the cache for budget accounting.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Image(img) | Self::Mask(img) => img.bytes.len(),
            Self::Audio(audio) => audio.bytes.len(),
            Self::Detections(list) => list.estimated_size_bytes(),
            Self::ProsodyAudio(p) => p.audio.bytes.len(),
            Self::Video(v) => v.bytes.len(),
        }
    }
}
