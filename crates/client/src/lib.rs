//! Client for the FileHeap storage service.
//!
//! Small files move in batches of up to [`BatchLimits::max_files`] files and
//! [`BatchLimits::max_bytes`] bytes per request. Larger files are written
//! through chunked upload sessions and read with ranged requests that resume
//! after interruptions. Every request is retried with jittered backoff and
//! stops as soon as the client's cancellation token fires.
//!
//! ```no_run
//! # async fn example() -> fileheap_client::Result<()> {
//! let client = fileheap_client::Client::new("fileheap.example.com")?;
//! let dataset = client.new_dataset().await?;
//! dataset.write_file("hello.txt", &b"hello"[..], 5).await?;
//! dataset.seal().await?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod buffer_pool;
mod client;
mod dataset;
mod download;
mod error;
mod iterator;
mod multipart;
mod range;
mod retry;
mod upload;

#[cfg(test)]
mod test_support;

pub use batch::{BatchLimits, DeleteBatch, FileReader, UploadBatch};
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use client::{Client, ClientConfig};
pub use dataset::DatasetRef;
pub use download::{BatchDownloader, FileBatch, FileContent, FileSource};
pub use error::{Error, Result};
pub use iterator::FileIterator;
pub use range::{RangeReader, range_header};
pub use retry::{RetryPolicy, is_retryable_status};

pub use fileheap_api as api;
