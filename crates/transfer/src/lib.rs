//! Concurrent uploads and downloads between local directories and FileHeap
//! datasets, with progress reporting.

mod bytefmt;
mod download;
mod error;
mod progress;
mod scanner;
mod upload;
mod validation;

pub use bytefmt::{format_bytes, format_rate, parse_bytes};
pub use download::{download, file_digest};
pub use error::TransferError;
pub use progress::{LogProgress, NoProgress, ProgressSink, ProgressTotals, ProgressUpdate};
pub use scanner::{SourceFile, scan_files};
pub use upload::upload;
pub use validation::{join_remote, local_path, validate_relative_path};

/// Default number of batches in flight.
pub const DEFAULT_CONCURRENCY: usize = 32;
