use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// A collection of files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Whether the dataset is locked for writes.
    #[serde(default, rename = "readonly")]
    pub read_only: bool,
}

/// Modification of a dataset's mutable properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetPatch {
    /// Locks the dataset for writes. Ignored if false.
    #[serde(default, rename = "readonly", skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// One page of a dataset listing, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestPage {
    #[serde(default)]
    pub files: Vec<FileInfo>,
    /// Cursor for the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cursor: String,
}

/// A single file within a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the dataset root, separated by `/`.
    pub path: String,
    pub size: u64,
    /// Raw SHA-256 bytes, base64 in JSON to match the service's `[]byte` encoding.
    #[serde(default, with = "digest_bytes")]
    pub digest: Option<Digest>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            digest: None,
            updated: None,
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }
}

/// Error body returned by the service for any status >= 400.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "status {}", self.code)
        } else {
            f.write_str(&self.message)
        }
    }
}

mod digest_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::digest::Digest;

    pub fn serialize<S: Serializer>(
        digest: &Option<Digest>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match digest {
            Some(d) => serializer.serialize_str(&STANDARD.encode(d.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Digest>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => {
                let raw = STANDARD.decode(s).map_err(D::Error::custom)?;
                Digest::from_slice(&raw).map(Some).map_err(D::Error::custom)
            }
        }
    }
}
