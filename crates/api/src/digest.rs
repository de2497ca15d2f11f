//! Content digests and their header encoding.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest as _, Sha256};

use crate::constants::SHA256;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Errors produced while decoding a digest header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("invalid digest: must include algorithm")]
    MissingAlgorithm,

    #[error("invalid digest: {0:?} is not a recognized algorithm")]
    UnknownAlgorithm(String),

    #[error("invalid digest: {0}")]
    Encoding(String),

    #[error("invalid digest: must be exactly {DIGEST_LEN} bytes, got {0}")]
    Length(usize),
}

/// A SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Hashes `data` in one shot.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Finishes a running hasher.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hasher.finalize().into())
    }

    /// Builds a digest from raw bytes, which must be exactly 32 long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let raw: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| DigestError::Length(bytes.len()))?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Formats the digest for the `Digest` header.
    pub fn encode(&self) -> String {
        format!("{SHA256} {}", STANDARD.encode(self.0))
    }

    /// Parses a `Digest` header value.
    ///
    /// An empty string means the digest is not known and yields `Ok(None)`.
    pub fn decode(value: &str) -> Result<Option<Self>, DigestError> {
        if value.is_empty() {
            return Ok(None);
        }

        let (algorithm, encoded) = value
            .split_once(' ')
            .ok_or(DigestError::MissingAlgorithm)?;
        if algorithm != SHA256 {
            return Err(DigestError::UnknownAlgorithm(algorithm.to_string()));
        }

        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| DigestError::Encoding(e.to_string()))?;
        Self::from_slice(&raw).map(Some)
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(raw: [u8; DIGEST_LEN]) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", STANDARD.encode(self.0))
    }
}
