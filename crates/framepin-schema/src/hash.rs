//! SHA256 checksums.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Errors produced when parsing a checksum string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The hex portion is not exactly 64 characters long.
    #[error("expected 64 hex characters, got {len} in '{input}'")]
    Length {
        /// Offending input, as given.
        input: String,
        /// Length of the hex portion.
        len: usize,
    },

    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// A validated SHA256 digest (64 lowercase hex characters).
///
/// Every checksum declared in a manifest is turned into a `Sha256Digest` at
/// load time, so comparisons against computed digests are plain string
/// equality on normalized lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix and normalizes the
    /// hex to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError::Length {
                len: hex.len(),
                input: s,
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Compute the SHA256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Compute the SHA256 digest of a file by reading it entirely into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::compute(&data))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn compute_matches_known_vector() {
        let digest = Sha256Digest::compute(b"hello world");
        assert_eq!(digest.as_str(), HELLO);
    }

    #[test]
    fn new_normalizes_case_and_prefix() {
        let upper = Sha256Digest::new(HELLO.to_uppercase()).unwrap();
        let prefixed = Sha256Digest::new(format!("sha256:{HELLO}")).unwrap();
        assert_eq!(upper.as_str(), HELLO);
        assert_eq!(prefixed, upper);
    }

    #[test]
    fn new_rejects_wrong_length() {
        let err = Sha256Digest::new("abc123").unwrap_err();
        assert!(matches!(err, DigestError::Length { len: 6, .. }));
    }

    #[test]
    fn new_rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(matches!(
            Sha256Digest::new(bad),
            Err(DigestError::NonHex(_))
        ));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<Sha256Digest, _> = serde_json::from_str(&format!("\"{HELLO}\""));
        assert!(ok.is_ok());
        let bad: Result<Sha256Digest, _> = serde_json::from_str("\"not-a-digest\"");
        assert!(bad.is_err());
    }
}
