//! Stage fingerprinting: the cache key for a stage computation.
//!
//! `SHA-256` over the canonical, length-prefixed concatenation of
//! `(operator_id, operator_version, ordered input artifact hashes, ordered
//! parameter list)`. Floating parameters are rounded to a fixed 4-digit
//! decimal grid before hashing so equivalent-but-differently-rounded inputs
//! produce the same key.

use sha2::{Digest, Sha256};

use crate::domain::ArtifactId;
use crate::ids::OperatorVersion;

/// A stage fingerprint: the cache key, a 32-byte SHA-256 digest of a
/// canonical input tuple. `to_hex()` gives the 64-character hex form used
/// wherever the key is stored or logged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One recognized parameter value, rounded/canonicalized before hashing.
#[derive(Clone, Debug)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Int(i64),
    /// Rounded to a 4-digit decimal grid before inclusion.
    Float(f64),
}

/// Builder for a stage fingerprint: operator id + version, ordered input
/// artifact ids, ordered parameter list.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    #[must_use]
    pub fn new(operator_id: &str, operator_version: OperatorVersion) -> Self {
        let mut b = Self {
            hasher: Sha256::new(),
        };
        b.write_bytes(operator_id.as_bytes());
        b.write_bytes(&operator_version.0.to_be_bytes());
        b
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        // Length-prefixed so adjacent fields can't be confused with each
        // other (e.g. ("ab", "c") vs ("a", "bc")).
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    #[must_use]
    pub fn with_input(mut self, input: ArtifactId) -> Self {
        self.write_bytes(&input.0);
        self
    }

    #[must_use]
    pub fn with_inputs<'a>(mut self, inputs: impl IntoIterator<Item = &'a ArtifactId>) -> Self {
        for input in inputs {
            self = self.with_input(*input);
        }
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: &str, value: &ParamValue) -> Self {
        self.write_bytes(name.as_bytes());
        match value {
            ParamValue::Str(s) => self.write_bytes(s.as_bytes()),
            ParamValue::Bool(b) => self.write_bytes(&[u8::from(*b)]),
            ParamValue::Int(i) => self.write_bytes(&i.to_be_bytes()),
            ParamValue::Float(f) => {
                let rounded = round_to_grid(*f);
                self.write_bytes(&rounded.to_be_bytes());
            }
        }
        self
    }

    #[must_use]
    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Fingerprint(out)
    }
}

/// Round a float to a fixed 4-decimal-digit grid.
#[must_use]
pub fn round_to_grid(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let id = ArtifactId::from_digest([7u8; 32]);
        let a = FingerprintBuilder::new("tts", OperatorVersion(1))
            .with_input(id)
            .with_param("speed", &ParamValue::Float(1.000_049))
            .finish();
        let b = FingerprintBuilder::new("tts", OperatorVersion(1))
            .with_input(id)
            .with_param("speed", &ParamValue::Float(1.000_051))
            .finish();
        assert_eq!(a, b, "values on the same 4-digit grid cell must collide");
    }

    #[test]
    fn different_operator_version_changes_fingerprint() {
        let id = ArtifactId::from_digest([1u8; 32]);
        let a = FingerprintBuilder::new("tts", OperatorVersion(1))
            .with_input(id)
            .finish();
        let b = FingerprintBuilder::new("tts", OperatorVersion(2))
            .with_input(id)
            .finish();
        assert_ne!(a, b);
    }

    #[test]
    fn field_boundaries_are_not_confusable() {
        let a = FingerprintBuilder::new("ab", OperatorVersion(0)).finish();
        // Same total bytes "abc" split differently must not collide because
        // of length-prefixing.
        let b = FingerprintBuilder::new("a", OperatorVersion(0))
            .with_param("", &ParamValue::Str("bc".to_string()))
            .finish();
        assert_ne!(a, b);
    }
}
