//! Error types for the FileHeap client.

use std::sync::Arc;

use fileheap_api::DigestError;
use fileheap_async::Cancellation;

/// Errors produced by the FileHeap client.
///
/// Cloneable so the first failure of a concurrent transfer can be handed to
/// every caller that asks for it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("batch does not have capacity for another file")]
    Capacity,

    #[error("HTTP error: {0}")]
    Transport(Arc<reqwest::Error>),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("batch error: {0}")]
    Batch(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("{path} truncated while uploading")]
    Truncated { path: String },

    #[error("not found")]
    NotFound,

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("address must be base server address in the form [scheme://]host[:port]: {0}")]
    InvalidAddress(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => !e.is_builder() && !e.is_redirect(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

impl Cancellation for Error {
    fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(Arc::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(Arc::new(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
