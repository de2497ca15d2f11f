//! Resumable ranged reads.
//!
//! Long downloads fail mid-stream when a connection drops or a timeout
//! fires. [`RangeReader`] hides those failures from its consumer: as long as
//! the failed attempt delivered at least one byte, it re-requests the rest
//! of the range and carries on from the same point.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::RANGE;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::client::check_found;
use crate::dataset::DatasetRef;
use crate::error::{Error, Result};
use crate::multipart::ByteStream;

/// Value of the `Range` header for a read, if one is needed.
///
/// `length` of `None` reads to the end of the file.
pub fn range_header(offset: u64, length: Option<u64>) -> Option<String> {
    match length {
        Some(len) if len > 0 => Some(format!("bytes={}-{}", offset, offset + len - 1)),
        None if offset != 0 => Some(format!("bytes={offset}-")),
        _ => None,
    }
}

/// Streams a byte range of a file, resuming after interrupted transfers.
pub struct RangeReader {
    dataset: DatasetRef,
    path: String,
    offset: u64,
    /// Bytes left to read, or `None` when reading to the end.
    remaining: Option<u64>,
    /// Bytes handed to the consumer by the current attempt.
    delivered: u64,
    stream: Option<ByteStream>,
    /// Set once a read fails; later reads report the same error.
    failed: Option<Error>,
}

impl RangeReader {
    /// Opens the range. The first request is made immediately so a missing
    /// file is reported here rather than on the first read.
    pub(crate) async fn open(
        dataset: DatasetRef,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Self> {
        if length == Some(0) {
            return Err(Error::InvalidArgument("length must not be zero".into()));
        }

        let mut reader = Self {
            dataset,
            path: path.to_string(),
            offset,
            remaining: length,
            delivered: 0,
            stream: None,
            failed: None,
        };
        reader.stream = Some(reader.reopen().await?);
        Ok(reader)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the next chunk of data, or `None` at the end of the range.
    ///
    /// Once a read fails, every later call returns that error.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let res = self.next_chunk().await;
        if let Err(err) = &res {
            self.stream = None;
            self.failed = Some(err.clone());
        }
        res
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            let cancel = self.dataset.client().cancel_token().clone();
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.delivered += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                None => {
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(err)) => {
                    self.stream = None;
                    if self.delivered == 0 || matches!(err, Error::Cancelled) {
                        return Err(err);
                    }
                    if !self.advance() {
                        return Ok(None);
                    }

                    info!(
                        dataset = %self.dataset.id(),
                        path = %self.path,
                        offset = self.offset,
                        error = %err,
                        "resuming interrupted read"
                    );
                    self.stream = Some(self.reopen().await?);
                }
            }
        }
    }

    /// Writes the rest of the range to `writer`. Returns the bytes written.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0;
        while let Some(chunk) = self.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    /// Reads the rest of the range into memory.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Moves the range past what the failed attempt delivered. Returns false
    /// when nothing is left to read.
    fn advance(&mut self) -> bool {
        let delivered = std::mem::take(&mut self.delivered);
        self.offset += delivered;
        match self.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(delivered);
                *remaining > 0
            }
            None => true,
        }
    }

    fn reopen(&self) -> impl Future<Output = Result<ByteStream>> + Send + use<> {
        request(
            self.dataset.clone(),
            self.path.clone(),
            range_header(self.offset, self.remaining),
        )
    }
}

/// Issues one ranged GET. Owns its inputs so the future is `Send` even
/// though the reader's stream is not `Sync`.
async fn request(dataset: DatasetRef, path: String, range: Option<String>) -> Result<ByteStream> {
    let client = dataset.client();
    let url = client.url(&["datasets", dataset.id(), "files", &path]);

    let resp = client
        .send(|| {
            let req = client.request(Method::GET, url.clone());
            match &range {
                Some(range) => req.header(RANGE, range.as_str()),
                None => req,
            }
        })
        .await?;
    let resp = check_found(resp).await?;
    Ok(Box::pin(resp.bytes_stream().map(|r| r.map_err(Error::from))))
}
