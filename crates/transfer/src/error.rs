//! Transfer error types.

use std::sync::Arc;

use fileheap_async::Cancellation;

/// Errors produced while moving files between disk and a dataset.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Client(#[from] fileheap_client::Error),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TransferError {
    /// The cancellation error, for operations stopped from outside.
    pub(crate) fn cancelled() -> Self {
        Self::Client(fileheap_client::Error::Cancelled)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io(Arc::new(e))
    }
}

impl Cancellation for TransferError {
    fn is_cancellation(&self) -> bool {
        matches!(self, TransferError::Client(e) if e.is_cancellation())
    }
}
