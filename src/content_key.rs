//! Content addressing for uploaded videos.
//!
//! Identity of an upload is the SHA-256 digest of its raw bytes. The same
//! bytes always map to the same key, which is what makes the verdict cache
//! idempotent and lets every fallback path derive a stable seed.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of an upload's raw bytes.
///
/// Serialized as a lowercase hex string (the persisted cache key format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Compute the key for a byte payload.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Lowercase hex encoding (64 chars).
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            use fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Parse a 64-char hex string back into a key.
    pub fn from_hex(hex: &str) -> Result<Self, ContentKeyError> {
        if hex.len() != 64 {
            return Err(ContentKeyError::BadLength(hex.len()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| ContentKeyError::BadDigit)?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| ContentKeyError::BadDigit)?;
        }
        Ok(Self(bytes))
    }

    /// The digest bytes as an RNG seed.
    ///
    /// Every deterministic fallback (audio vector, full fallback verdict)
    /// seeds its generator from this, so fallback output is stable per video.
    pub fn seed(&self) -> [u8; 32] {
        self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> String {
        key.to_hex()
    }
}

impl TryFrom<String> for ContentKey {
    type Error = ContentKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

/// Errors from parsing a persisted key.
#[derive(Debug, thiserror::Error)]
pub enum ContentKeyError {
    #[error("Content key must be 64 hex chars, got {0}")]
    BadLength(usize),
    #[error("Content key contains a non-hex digit")]
    BadDigit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let k1 = ContentKey::digest(b"same video bytes");
        let k2 = ContentKey::digest(b"same video bytes");
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_content_different_key() {
        let k1 = ContentKey::digest(b"video A");
        let k2 = ContentKey::digest(b"video B");
        assert_ne!(k1, k2);
    }

    #[test]
    fn hex_roundtrip() {
        let key = ContentKey::digest(b"roundtrip");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentKey::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(ContentKey::from_hex("abc").is_err());
        assert!(ContentKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn known_vector() {
        // SHA-256 of the empty payload.
        let key = ContentKey::digest(b"");
        assert_eq!(
            key.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn short_is_hex_prefix() {
        let key = ContentKey::digest(b"prefix");
        assert_eq!(key.short(), key.to_hex()[..8]);
    }
}
