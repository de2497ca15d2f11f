//! Batched downloads.
//!
//! [`BatchDownloader`] groups the files of a [`FileSource`] into batches
//! bounded by [`BatchLimits`]. Each [`FileBatch`] then yields its files in
//! order: a lone file is read directly with a resumable range read, larger
//! batches are fetched in one multipart response whose parts pair with the
//! requested files by position.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use fileheap_api::FileInfo;
use fileheap_api::constants::{HEADER_BATCH_ERROR, HEADER_DIGEST};
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::batch::BatchLimits;
use crate::client::check_response;
use crate::dataset::DatasetRef;
use crate::error::{Error, Result};
use crate::multipart::{MultipartReader, MultipartWriter, parse_boundary};
use crate::range::RangeReader;

/// Lazy producer of file metadata.
pub trait FileSource: Send {
    /// Returns the next file, `None` once exhausted.
    fn next(&mut self) -> impl Future<Output = Result<Option<FileInfo>>> + Send;
}

impl FileSource for std::vec::IntoIter<FileInfo> {
    async fn next(&mut self) -> Result<Option<FileInfo>> {
        Ok(Iterator::next(self))
    }
}

/// Iterator over the download batches of a file source.
pub struct BatchDownloader<S> {
    dataset: DatasetRef,
    files: S,
    limits: BatchLimits,
    /// The file that overflowed the previous batch.
    pending: Option<FileInfo>,
    exhausted: bool,
}

impl<S: FileSource> BatchDownloader<S> {
    pub(crate) fn new(dataset: DatasetRef, files: S) -> Self {
        let limits = dataset.client().limits();
        Self {
            dataset,
            files,
            limits,
            pending: None,
            exhausted: false,
        }
    }

    /// Returns the next batch, or `None` once every file has been batched.
    pub async fn next(&mut self) -> Result<Option<FileBatch>> {
        let mut infos = Vec::new();
        let mut size = 0u64;

        if let Some(info) = self.pending.take() {
            size += info.size;
            infos.push(info);
        }

        while !self.exhausted {
            let Some(info) = self.files.next().await? else {
                self.exhausted = true;
                break;
            };
            if !self.limits.has_capacity(infos.len(), size, info.size) {
                self.pending = Some(info);
                break;
            }
            size += info.size;
            infos.push(info);
        }

        if infos.is_empty() {
            return Ok(None);
        }
        Ok(Some(FileBatch::new(self.dataset.clone(), infos, size)))
    }
}

enum Body {
    Unopened,
    Multipart {
        reader: MultipartReader,
        batch_error: Option<String>,
    },
    Closed,
}

/// A group of files fetched together.
pub struct FileBatch {
    dataset: DatasetRef,
    infos: Vec<FileInfo>,
    size: u64,
    /// Number of files handed out so far.
    read: usize,
    err: Option<Error>,
    body: Body,
}

impl FileBatch {
    fn new(dataset: DatasetRef, infos: Vec<FileInfo>, size: u64) -> Self {
        Self {
            dataset,
            infos,
            size,
            read: 0,
            err: None,
            body: Body::Unopened,
        }
    }

    /// Number of files in the batch.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Total size of the batch in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn infos(&self) -> &[FileInfo] {
        &self.infos
    }

    /// Returns the next file and its contents, or `None` when every file has
    /// been returned.
    ///
    /// Any error closes the batch; later calls return the same error.
    pub async fn next_file(&mut self) -> Result<Option<(FileInfo, FileContent<'_>)>> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.read >= self.infos.len() {
            self.body = Body::Closed;
            return Ok(None);
        }

        let index = self.read;
        self.read += 1;

        let source = match self.open_next(index).await {
            Ok(source) => source,
            Err(err) => {
                self.err = Some(err.clone());
                self.body = Body::Closed;
                return Err(err);
            }
        };

        let info = self.infos[index].clone();
        Ok(Some((
            info,
            FileContent {
                batch: self,
                source,
            },
        )))
    }

    async fn open_next(&mut self, index: usize) -> Result<Source> {
        if self.infos.len() == 1 {
            let reader = self.dataset.read_file(&self.infos[index].path).await?;
            return Ok(Source::Range(reader));
        }

        if matches!(self.body, Body::Unopened) {
            self.body = self.request().await?;
        }
        let Body::Multipart {
            reader,
            batch_error,
        } = &mut self.body
        else {
            return Err(Error::Batch("batch is closed".into()));
        };

        match reader.next_part().await? {
            Some(_) => Ok(Source::Part),
            None => Err(Error::Batch(batch_error.clone().unwrap_or_else(|| {
                format!("response ended after {index} of {} files", self.infos.len())
            }))),
        }
    }

    async fn request(&mut self) -> Result<Body> {
        let mut buf = BytesMut::with_capacity(self.infos.len() * 128);
        let mut mw = MultipartWriter::new(&mut buf);
        let content_type = mw.content_type();
        for info in &self.infos {
            let digest = info.digest.as_ref().ok_or_else(|| {
                Error::InvalidArgument(format!("{} has no digest", info.path))
            })?;
            mw.start_part(&[(HEADER_DIGEST, digest.encode().as_str())]);
        }
        mw.finish();
        let body = buf.freeze();

        debug!(
            dataset = %self.dataset.id(),
            files = self.infos.len(),
            bytes = self.size,
            "downloading batch"
        );

        let client = self.dataset.client();
        let url = client.url(&["datasets", self.dataset.id(), "batch/download"]);
        let timeout = client.config().batch_timeout;
        let resp = client
            .send(|| {
                client
                    .request(Method::POST, url.clone())
                    .header(CONTENT_TYPE, content_type.as_str())
                    .timeout(timeout)
                    .body(body.clone())
            })
            .await?;
        let resp = check_response(resp).await?;

        let media_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let boundary = parse_boundary(media_type)?;
        let batch_error = resp
            .headers()
            .get(HEADER_BATCH_ERROR)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let stream = Box::pin(resp.bytes_stream().map(|r| r.map_err(Error::from)));
        Ok(Body::Multipart {
            reader: MultipartReader::new(stream, &boundary, client.cancel_token().clone()),
            batch_error,
        })
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
        self.body = Body::Closed;
        err
    }
}

enum Source {
    Range(RangeReader),
    Part,
}

/// Contents of one file in a [`FileBatch`].
///
/// Borrows the batch, so it must be consumed or dropped before the next call
/// to [`FileBatch::next_file`]. Unread contents are skipped.
pub struct FileContent<'a> {
    batch: &'a mut FileBatch,
    source: Source,
}

impl FileContent<'_> {
    /// Returns the next chunk of the file, `None` at its end.
    ///
    /// Once the batch has failed, every later call returns its error.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(err) = &self.batch.err {
            return Err(err.clone());
        }
        let res = match &mut self.source {
            Source::Range(reader) => reader.chunk().await,
            Source::Part => match &mut self.batch.body {
                Body::Multipart { reader, .. } => reader.read_chunk().await,
                _ => Ok(None),
            },
        };
        res.map_err(|err| self.batch.fail(err))
    }

    /// Writes the rest of the file to `writer`. Returns the bytes written.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0;
        while let Some(chunk) = self.chunk().await? {
            if let Err(err) = writer.write_all(&chunk).await {
                return Err(self.batch.fail(err.into()));
            }
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    /// Reads the rest of the file into memory.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}
