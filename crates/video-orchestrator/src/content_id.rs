//! Content-addressing helper for values that never flow through the
//! Result Cache (and so never get an [`ArtifactId`] assigned by it) but
//! still need one to feed into a downstream stage's fingerprint —
//! the TTS/prosody audio handed to later stages, for instance.

use sha2::{Digest, Sha256};

use video_core::domain::ArtifactId;

#[must_use]
pub fn content_artifact_id(bytes: &[u8]) -> ArtifactId {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    ArtifactId::from_digest(out)
}
