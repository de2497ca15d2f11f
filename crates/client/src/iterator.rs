//! Paged dataset listings.

use std::collections::VecDeque;

use fileheap_api::{FileInfo, ManifestPage};
use reqwest::Method;

use crate::client::{check_found, parse_response};
use crate::dataset::DatasetRef;
use crate::download::FileSource;
use crate::error::{Error, Result};

/// Iterates over the files of a dataset, fetching one manifest page at a time.
pub struct FileIterator {
    dataset: DatasetRef,
    prefix: String,
    limit: Option<usize>,
    files: VecDeque<FileInfo>,
    cursor: String,
    /// Set once the page without a cursor has been fetched.
    last_page: bool,
}

impl FileIterator {
    pub(crate) fn new(dataset: DatasetRef, prefix: &str) -> Self {
        Self {
            dataset,
            prefix: prefix.to_string(),
            limit: None,
            files: VecDeque::new(),
            cursor: String::new(),
            last_page: false,
        }
    }

    /// Sets the most files fetched per request.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        self.limit = Some(limit);
        Ok(())
    }

    /// Returns the next file, or `None` once the listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<FileInfo>> {
        loop {
            if let Some(info) = self.files.pop_front() {
                return Ok(Some(info));
            }
            if self.last_page {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let client = self.dataset.client();
        let mut url = client.url(&["datasets", self.dataset.id(), "manifest"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("cursor", &self.cursor);
            query.append_pair("path", &self.prefix);
            if let Some(limit) = self.limit {
                query.append_pair("limit", &limit.to_string());
            }
        }

        let resp = client.send_json::<()>(Method::GET, url, None).await?;
        let page: ManifestPage = parse_response(check_found(resp).await?).await?;

        self.files.extend(page.files);
        self.last_page = page.cursor.is_empty();
        self.cursor = page.cursor;
        Ok(())
    }
}

impl FileSource for FileIterator {
    async fn next(&mut self) -> Result<Option<FileInfo>> {
        FileIterator::next(self).await
    }
}
