use std::fmt;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Marks errors that only signal cancellation.
///
/// Cancellation is how in-flight work winds down after a real failure
/// elsewhere, so it is never recorded as the operation's error.
pub trait Cancellation {
    fn is_cancellation(&self) -> bool;
}

/// Records the first error reported by concurrent tasks.
///
/// Recording an error also cancels the aggregator's token, which every task
/// sharing the operation should observe.
pub struct AsyncError<E> {
    err: Mutex<Option<E>>,
    cancel: CancellationToken,
}

impl<E> Default for AsyncError<E> {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl<E> AsyncError<E> {
    /// Creates an aggregator that cancels `cancel` on the first error.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            err: Mutex::new(None),
            cancel,
        }
    }

    /// Token cancelled when an error is recorded.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_set(&self) -> bool {
        self.err.lock().is_some()
    }

    /// Removes and returns the recorded error.
    pub fn take(&self) -> Option<E> {
        self.err.lock().take()
    }
}

impl<E: Clone> AsyncError<E> {
    /// Returns the first recorded error, if any.
    pub fn get(&self) -> Option<E> {
        self.err.lock().clone()
    }
}

impl<E: Cancellation + fmt::Display> AsyncError<E> {
    /// Records `err` unless an error is already recorded or `err` is a
    /// cancellation. Returns whether it was recorded.
    pub fn report(&self, err: E) -> bool {
        if err.is_cancellation() {
            return false;
        }

        {
            let mut slot = self.err.lock();
            if slot.is_some() {
                return false;
            }
            debug!(error = %err, "recording first error");
            *slot = Some(err);
        }
        self.cancel.cancel();
        true
    }
}
