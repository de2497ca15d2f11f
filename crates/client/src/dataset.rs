//! Dataset handles and single-file operations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fileheap_api::constants::HEADER_DIGEST;
use fileheap_api::{Dataset, DatasetPatch, Digest, FileInfo};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{DeleteBatch, UploadBatch};
use crate::client::{Client, check_found, check_response, parse_response};
use crate::download::{BatchDownloader, FileSource};
use crate::error::{Error, Result};
use crate::iterator::FileIterator;
use crate::range::RangeReader;
use crate::upload::digest_header;

/// Reference to a dataset.
///
/// Creating a reference does not contact the service, so callers should not
/// assume the dataset exists.
#[derive(Clone)]
pub struct DatasetRef {
    client: Client,
    id: String,
}

impl DatasetRef {
    pub(crate) fn new(client: Client, id: String) -> Self {
        Self { client, id }
    }

    /// The dataset's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Absolute URL of the dataset.
    pub fn url(&self) -> String {
        self.client.url(&["datasets", &self.id]).to_string()
    }

    /// Returns a reference whose requests stop when `cancel` is cancelled.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            client: self.client.with_cancel(cancel),
            id: self.id.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Dataset metadata
    // -----------------------------------------------------------------------

    pub async fn info(&self) -> Result<Dataset> {
        let url = self.client.url(&["datasets", &self.id]);
        let resp = self.client.send_json::<()>(Method::GET, url, None).await?;
        parse_response(check_found(resp).await?).await
    }

    /// Makes the dataset read-only. This cannot be undone.
    pub async fn seal(&self) -> Result<()> {
        let url = self.client.url(&["datasets", &self.id]);
        let patch = DatasetPatch { read_only: true };
        let resp = self
            .client
            .send_json(Method::PATCH, url, Some(&patch))
            .await?;
        check_found(resp).await?;
        Ok(())
    }

    /// Deletes the dataset and all of its files.
    pub async fn delete(&self) -> Result<()> {
        let url = self.client.url(&["datasets", &self.id]);
        let resp = self
            .client
            .send_json::<()>(Method::DELETE, url, None)
            .await?;
        check_found(resp).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing and batches
    // -----------------------------------------------------------------------

    /// Lists the files whose paths start with `prefix`, in path order.
    pub fn files(&self, prefix: &str) -> FileIterator {
        FileIterator::new(self.clone(), prefix)
    }

    pub fn new_upload_batch(&self) -> UploadBatch {
        UploadBatch::new(self.clone())
    }

    pub fn new_delete_batch(&self) -> DeleteBatch {
        DeleteBatch::new(self.clone())
    }

    /// Groups the files produced by `files` into download batches.
    pub fn download_batch<S: FileSource>(&self, files: S) -> BatchDownloader<S> {
        BatchDownloader::new(self.clone(), files)
    }

    // -----------------------------------------------------------------------
    // Single files
    // -----------------------------------------------------------------------

    /// Fetches a file's size, digest and modification time.
    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        let url = self.file_url(path);
        let resp = self
            .client
            .send(|| self.client.request(Method::HEAD, url.clone()))
            .await?;
        let resp = check_found(resp).await?;
        file_info_from_headers(path, resp.headers())
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let url = self.file_url(path);
        let resp = self
            .client
            .send(|| self.client.request(Method::DELETE, url.clone()))
            .await?;
        check_found(resp).await?;
        Ok(())
    }

    /// Reads a whole file.
    pub async fn read_file(&self, path: &str) -> Result<RangeReader> {
        RangeReader::open(self.clone(), path, 0, None).await
    }

    /// Reads up to `length` bytes starting at `offset`, or to the end of the
    /// file if `length` is `None`. A zero length is rejected.
    pub async fn read_file_range(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<RangeReader> {
        RangeReader::open(self.clone(), path, offset, length).await
    }

    /// Writes `size` bytes from `reader` to `path`, replacing any existing
    /// file. Files above the request limit go through a chunked upload.
    pub async fn write_file<R>(&self, path: &str, reader: R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        // The source may grow while it is being read.
        let mut reader = reader.take(size);

        let mut digest = None;
        let mut buf = None;
        if size > self.client.limits().max_bytes {
            digest = Some(self.client.upload(path, &mut reader, size).await?);
        } else if size > 0 {
            let mut pooled = self.client.buffers().acquire(size as usize);
            if pooled.fill_from(&mut reader, size).await? < size {
                return Err(Error::Truncated {
                    path: path.to_string(),
                });
            }
            buf = Some(pooled);
        }
        drop(reader);

        let body = match buf.as_mut() {
            Some(pooled) => pooled.split().freeze(),
            None => Bytes::new(),
        };
        debug!(dataset = %self.id, path, size, chunked = digest.is_some(), "writing file");
        self.put(path, digest, body).await
    }

    /// Adds a file whose contents the service already holds.
    pub async fn add_file(&self, path: &str, digest: &Digest) -> Result<()> {
        self.put(path, Some(*digest), Bytes::new()).await
    }

    async fn put(&self, path: &str, digest: Option<Digest>, body: Bytes) -> Result<()> {
        let url = self.file_url(path);
        let digest = digest.map(|d| d.encode());
        let resp = self
            .client
            .send(|| {
                let req = self.client.request(Method::PUT, url.clone());
                let req = match &digest {
                    Some(d) => req.header(HEADER_DIGEST, d.as_str()),
                    None => req,
                };
                req.body(body.clone())
            })
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    fn file_url(&self, path: &str) -> reqwest::Url {
        self.client.url(&["datasets", &self.id, "files", path])
    }
}

fn file_info_from_headers(path: &str, headers: &HeaderMap) -> Result<FileInfo> {
    // HEAD responses carry no body, so the length comes from the header.
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let updated = match headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()) {
        Some(value) => Some(
            DateTime::parse_from_rfc2822(value)
                .map_err(|e| Error::Protocol(format!("invalid Last-Modified {value:?}: {e}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(FileInfo {
        path: path.to_string(),
        size,
        digest: digest_header(headers)?,
        updated,
    })
}
