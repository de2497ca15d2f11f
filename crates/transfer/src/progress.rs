//! Progress reporting.
//!
//! Orchestrators report [`ProgressUpdate`] deltas. Sinks accumulate them
//! behind their own locks, so concurrent reporters never race on a shared
//! total.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::bytefmt::{format_bytes, format_rate};

/// Changes to each tracked counter. Negative values undo earlier updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub files_pending: i64,
    pub files_written: i64,
    pub bytes_pending: i64,
    pub bytes_written: i64,
}

impl ProgressUpdate {
    /// Work admitted but not yet finished.
    pub fn pending(files: i64, bytes: i64) -> Self {
        Self {
            files_pending: files,
            bytes_pending: bytes,
            ..Self::default()
        }
    }

    /// Pending work that completed.
    pub fn completed(files: i64, bytes: i64) -> Self {
        Self {
            files_pending: -files,
            files_written: files,
            bytes_pending: -bytes,
            bytes_written: bytes,
        }
    }

    /// Work finished without ever being pending.
    pub fn written(files: i64, bytes: i64) -> Self {
        Self {
            files_written: files,
            bytes_written: bytes,
            ..Self::default()
        }
    }

    fn apply(&mut self, delta: &ProgressUpdate) {
        self.files_pending += delta.files_pending;
        self.files_written += delta.files_written;
        self.bytes_pending += delta.bytes_pending;
        self.bytes_written += delta.bytes_written;
    }
}

/// Receives progress deltas from concurrent tasks.
pub trait ProgressSink: Send + Sync {
    fn update(&self, delta: &ProgressUpdate);

    /// Called once after an operation completes successfully.
    fn finish(&self) {}
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _: &ProgressUpdate) {}
}

/// Accumulates progress into running totals.
#[derive(Debug, Default)]
pub struct ProgressTotals {
    totals: Mutex<ProgressUpdate>,
}

impl ProgressTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals.
    pub fn totals(&self) -> ProgressUpdate {
        *self.totals.lock()
    }
}

impl ProgressSink for ProgressTotals {
    fn update(&self, delta: &ProgressUpdate) {
        self.totals.lock().apply(delta);
    }
}

/// Logs running totals on every update and the overall rate on finish.
pub struct LogProgress {
    totals: ProgressTotals,
    start: Instant,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            totals: ProgressTotals::new(),
            start: Instant::now(),
        }
    }

    pub fn totals(&self) -> ProgressUpdate {
        self.totals.totals()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl ProgressSink for LogProgress {
    fn update(&self, delta: &ProgressUpdate) {
        let t = {
            let mut totals = self.totals.totals.lock();
            totals.apply(delta);
            *totals
        };
        info!(
            files_written = t.files_written,
            bytes_written = %format_bytes(t.bytes_written.max(0) as u64),
            files_pending = t.files_pending,
            bytes_pending = %format_bytes(t.bytes_pending.max(0) as u64),
            "progress"
        );
    }

    fn finish(&self) {
        let t = self.totals();
        let elapsed = self.elapsed();
        info!(
            files = t.files_written,
            bytes = %format_bytes(t.bytes_written.max(0) as u64),
            elapsed_ms = elapsed.as_millis() as u64,
            rate = %format_rate(t.bytes_written.max(0) as u64, elapsed),
            "transfer complete"
        );
    }
}
