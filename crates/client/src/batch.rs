//! Upload and delete batches.
//!
//! A batch groups many small single-file operations into one multipart
//! request. Capacity is checked before every admission, so a batch is always
//! either empty or within both the file-count and the byte limit.

use fileheap_api::constants::HEADER_PATH;
use fileheap_api::{BATCH_SIZE_LIMIT, PUT_FILE_SIZE_LIMIT};
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::buffer_pool::read_into;
use crate::client::check_response;
use crate::dataset::DatasetRef;
use crate::error::{Error, Result};
use crate::multipart::MultipartWriter;

/// Source of a file's contents.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Size bounds of a single batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Most files in one batch.
    pub max_files: usize,
    /// Most bytes in one request. Also the largest file sent without the
    /// chunked upload API, and the chunk size of that API.
    pub max_bytes: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_files: BATCH_SIZE_LIMIT,
            max_bytes: PUT_FILE_SIZE_LIMIT,
        }
    }
}

impl BatchLimits {
    /// Whether a batch holding `count` files and `total` bytes can take one
    /// more file of `size` bytes. An empty batch accepts any single file.
    pub fn has_capacity(&self, count: usize, total: u64, size: u64) -> bool {
        count == 0 || (count < self.max_files && total.saturating_add(size) <= self.max_bytes)
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

struct UploadEntry {
    path: String,
    reader: FileReader,
    size: u64,
}

/// Files and their readers, uploaded together.
pub struct UploadBatch {
    dataset: DatasetRef,
    limits: BatchLimits,
    entries: Vec<UploadEntry>,
    size: u64,
}

impl UploadBatch {
    pub(crate) fn new(dataset: DatasetRef) -> Self {
        let limits = dataset.client().limits();
        Self {
            dataset,
            limits,
            entries: Vec::new(),
            size: 0,
        }
    }

    /// Number of files in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of the batch in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checks whether the batch has room for a file of the given size.
    pub fn has_capacity(&self, size: u64) -> bool {
        self.limits.has_capacity(self.entries.len(), self.size, size)
    }

    /// Adds a file to the batch. `reader` must yield exactly `size` bytes.
    pub fn add_file(
        &mut self,
        path: impl Into<String>,
        reader: FileReader,
        size: u64,
    ) -> Result<()> {
        if !self.has_capacity(size) {
            return Err(Error::Capacity);
        }

        self.entries.push(UploadEntry {
            path: path.into(),
            reader,
            size,
        });
        self.size += size;
        Ok(())
    }

    /// Uploads every file in the batch.
    ///
    /// Consumes the batch; all readers are dropped when this returns, whether
    /// or not the upload succeeded.
    pub async fn upload(self) -> Result<()> {
        let UploadBatch {
            dataset,
            mut entries,
            size,
            ..
        } = self;

        match entries.len() {
            0 => return Ok(()),
            1 => {
                if let Some(entry) = entries.pop() {
                    return dataset.write_file(&entry.path, entry.reader, entry.size).await;
                }
            }
            _ => {}
        }

        let client = dataset.client();
        let mut buf = client.buffers().acquire(size as usize + entries.len() * 256);
        let mut mw = MultipartWriter::new(&mut buf);
        let content_type = mw.content_type();
        for entry in &mut entries {
            let body = mw.start_part(&[(HEADER_PATH, entry.path.as_str())]);
            let read = read_into(&mut entry.reader, body, entry.size).await?;
            if read < entry.size {
                return Err(Error::Truncated {
                    path: entry.path.clone(),
                });
            }
        }
        mw.finish();
        let files = entries.len();
        drop(entries);

        let body = buf.split().freeze();
        debug!(
            dataset = %dataset.id(),
            files,
            bytes = size,
            "uploading batch"
        );

        let url = client.url(&["datasets", dataset.id(), "batch/upload"]);
        let resp = client
            .send(|| {
                client
                    .request(Method::POST, url.clone())
                    .header(CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Paths to delete from a dataset together.
pub struct DeleteBatch {
    dataset: DatasetRef,
    limits: BatchLimits,
    paths: Vec<String>,
}

impl DeleteBatch {
    pub(crate) fn new(dataset: DatasetRef) -> Self {
        let limits = dataset.client().limits();
        Self {
            dataset,
            limits,
            paths: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Deletes carry no payload, so only the file count is bounded.
    pub fn has_capacity(&self) -> bool {
        self.paths.len() < self.limits.max_files
    }

    pub fn add_file(&mut self, path: impl Into<String>) -> Result<()> {
        if !self.has_capacity() {
            return Err(Error::Capacity);
        }
        self.paths.push(path.into());
        Ok(())
    }

    /// Deletes every path in the batch.
    pub async fn delete(self) -> Result<()> {
        match self.paths.as_slice() {
            [] => return Ok(()),
            [path] => return self.dataset.delete_file(path).await,
            _ => {}
        }

        let client = self.dataset.client();
        let mut buf = client.buffers().acquire(self.paths.len() * 128);
        let mut mw = MultipartWriter::new(&mut buf);
        let content_type = mw.content_type();
        for path in &self.paths {
            mw.start_part(&[(HEADER_PATH, path.as_str())]);
        }
        mw.finish();
        let body = buf.split().freeze();

        debug!(dataset = %self.dataset.id(), files = self.paths.len(), "deleting batch");
        let url = client.url(&["datasets", self.dataset.id(), "batch/delete"]);
        let resp = client
            .send(|| {
                client
                    .request(Method::POST, url.clone())
                    .header(CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}
