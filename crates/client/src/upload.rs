//! Chunked upload sessions for files above the single-request limit.
//!
//! ```text
//! POST  /uploads                    -> Upload-ID
//! PATCH /uploads/{id}  (per chunk)     Upload-Length, Upload-Offset
//!                                   <- Digest (once the last chunk lands)
//! ```

use fileheap_api::Digest;
use fileheap_api::constants::{
    HEADER_DIGEST, HEADER_UPLOAD_EXPIRES, HEADER_UPLOAD_ID, HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_OFFSET,
};
use reqwest::Method;
use reqwest::header::HeaderMap;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::client::{Client, check_response};
use crate::error::{Error, Result};

impl Client {
    /// Streams `length` bytes from `reader` through a new upload session and
    /// returns the digest the service computed. `path` only labels errors.
    ///
    /// Empty sources are not supported; write those with a plain PUT.
    pub(crate) async fn upload<R>(&self, path: &str, reader: &mut R, length: u64) -> Result<Digest>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let id = self.create_upload().await?;
        debug!(upload = %id, path, length, "started chunked upload");

        let chunk_size = self.limits().max_bytes.min(length).max(1);
        let mut buf = self.buffers().acquire(chunk_size as usize);
        let url = self.url(&["uploads", &id]);
        let length_header = length.to_string();

        let mut written = 0u64;
        while written < length {
            let want = chunk_size.min(length - written);
            let n = buf.fill_from(reader, want).await?;
            if n < want {
                return Err(Error::Truncated {
                    path: path.to_string(),
                });
            }

            let body = buf.split().freeze();
            let offset_header = written.to_string();
            let resp = self
                .send(|| {
                    self.request(Method::PATCH, url.clone())
                        .header(HEADER_UPLOAD_LENGTH, length_header.as_str())
                        .header(HEADER_UPLOAD_OFFSET, offset_header.as_str())
                        .body(body.clone())
                })
                .await?;
            let resp = check_response(resp).await?;

            if let Some(digest) = digest_header(resp.headers())? {
                debug!(upload = %id, path, %digest, "chunked upload complete");
                return Ok(digest);
            }
            written += n;
        }

        Err(Error::Protocol("service did not return digest".into()))
    }

    async fn create_upload(&self) -> Result<String> {
        let url = self.url(&["uploads"]);
        let resp = self.send(|| self.request(Method::POST, url.clone())).await?;
        let resp = check_response(resp).await?;

        if let Some(expires) = header_str(resp.headers(), HEADER_UPLOAD_EXPIRES) {
            debug!(expires, "upload session expiry");
        }
        header_str(resp.headers(), HEADER_UPLOAD_ID)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("service did not return an upload ID".into()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decodes the `Digest` header, if present and non-empty.
pub(crate) fn digest_header(headers: &HeaderMap) -> Result<Option<Digest>> {
    match headers.get(HEADER_DIGEST) {
        None => Ok(None),
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| Error::Protocol("digest header is not valid text".into()))?;
            Ok(Digest::decode(value)?)
        }
    }
}
