//! `multipart/mixed` framing for batch requests and responses.
//!
//! # Wire format
//!
//! ```text
//! --<boundary>\r\n
//! Path: dir/a.txt\r\n
//! \r\n
//! <part body>\r\n
//! --<boundary>\r\n
//! ...
//! <part body>\r\n
//! --<boundary>--\r\n
//! ```
//!
//! Requests are assembled in memory so they can be replayed on retry.
//! Responses are parsed incrementally from the body stream, one part at a
//! time, so a batch of large files is never held in memory at once.

use std::pin::Pin;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use memchr::memmem;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Streaming response body.
pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Largest header block accepted for a single part.
const MAX_HEADER_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes parts into a caller-provided buffer.
pub(crate) struct MultipartWriter<'a> {
    buf: &'a mut BytesMut,
    boundary: String,
    parts: usize,
}

impl<'a> MultipartWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self::with_boundary(buf, random_boundary())
    }

    pub fn with_boundary(buf: &'a mut BytesMut, boundary: String) -> Self {
        Self {
            buf,
            boundary,
            parts: 0,
        }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    /// Starts a new part and returns the buffer its body should be written to.
    pub fn start_part(&mut self, headers: &[(&str, &str)]) -> &mut BytesMut {
        if self.parts > 0 {
            self.buf.put_slice(b"\r\n");
        }
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"\r\n");
        for (name, value) in headers {
            self.buf.put_slice(name.as_bytes());
            self.buf.put_slice(b": ");
            self.buf.put_slice(value.as_bytes());
            self.buf.put_slice(b"\r\n");
        }
        self.buf.put_slice(b"\r\n");
        self.parts += 1;
        self.buf
    }

    /// Writes the closing delimiter.
    pub fn finish(self) {
        if self.parts > 0 {
            self.buf.put_slice(b"\r\n");
        }
        self.buf.put_slice(b"--");
        self.buf.put_slice(self.boundary.as_bytes());
        self.buf.put_slice(b"--\r\n");
    }
}

/// 30 random bytes, hex encoded.
fn random_boundary() -> String {
    let mut raw = [0u8; 30];
    rand::thread_rng().fill(&mut raw[..]);
    hex::encode(raw)
}

/// Extracts the boundary from a `multipart/mixed` content type.
pub(crate) fn parse_boundary(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("multipart/mixed") {
        return Err(Error::Protocol(format!(
            "unexpected media type {media_type:?}"
        )));
    }

    params
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::Protocol("multipart response has no boundary".into()))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Headers of one part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PartHeaders(Vec<(String, String)>);

impl PartHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter.
    Preamble,
    /// Just past a delimiter; part headers or the close marker come next.
    Delimiter,
    /// Inside a part body.
    Body,
    /// Past the close marker.
    Done,
}

/// Incremental reader over a `multipart/mixed` body stream.
pub(crate) struct MultipartReader {
    stream: ByteStream,
    cancel: CancellationToken,
    buf: BytesMut,
    delimiter: memmem::Finder<'static>,
    state: State,
    eof: bool,
}

impl MultipartReader {
    pub fn new(stream: ByteStream, boundary: &str, cancel: CancellationToken) -> Self {
        let delimiter = format!("\r\n--{boundary}").into_bytes();
        // A leading CRLF lets the first delimiter match like every other one.
        let mut buf = BytesMut::with_capacity(8 * 1024);
        buf.put_slice(b"\r\n");
        Self {
            stream,
            cancel,
            buf,
            delimiter: memmem::Finder::new(&delimiter).into_owned(),
            state: State::Preamble,
            eof: false,
        }
    }

    /// Advances to the next part, discarding whatever is left of the current
    /// one. Returns `None` once the close marker is reached.
    pub async fn next_part(&mut self) -> Result<Option<PartHeaders>> {
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Preamble | State::Body => {
                    while self.body_chunk().await?.is_some() {}
                }
                State::Delimiter => return self.read_headers().await,
            }
        }
    }

    /// Reads the next chunk of the current part's body. Returns `None` at the
    /// end of the part.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.state != State::Body {
            return Ok(None);
        }
        self.body_chunk().await
    }

    async fn body_chunk(&mut self) -> Result<Option<Bytes>> {
        let delimiter_len = self.delimiter.needle().len();
        loop {
            if let Some(pos) = self.delimiter.find(&self.buf) {
                if pos > 0 {
                    return Ok(Some(self.buf.split_to(pos).freeze()));
                }
                self.buf.advance(delimiter_len);
                self.state = State::Delimiter;
                return Ok(None);
            }

            // Keep a tail that could be the start of a delimiter.
            let safe = self.buf.len().saturating_sub(delimiter_len - 1);
            if safe > 0 {
                return Ok(Some(self.buf.split_to(safe).freeze()));
            }

            if !self.fill().await? {
                return Err(Error::Protocol(
                    "multipart body ended before closing boundary".into(),
                ));
            }
        }
    }

    async fn read_headers(&mut self) -> Result<Option<PartHeaders>> {
        loop {
            if self.buf.starts_with(b"--") {
                self.state = State::Done;
                return Ok(None);
            }

            if let Some(line_end) = memmem::find(&self.buf, b"\r\n") {
                if !self.buf[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
                    return Err(Error::Protocol("malformed multipart delimiter".into()));
                }

                let rest = &self.buf[line_end + 2..];
                let block = if rest.starts_with(b"\r\n") {
                    Some((0, 2))
                } else {
                    memmem::find(rest, b"\r\n\r\n").map(|i| (i, i + 4))
                };

                if let Some((headers_len, consumed)) = block {
                    let headers = parse_headers(&rest[..headers_len]);
                    self.buf.advance(line_end + 2 + consumed);
                    self.state = State::Body;
                    return Ok(Some(headers));
                }
            }

            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(Error::Protocol("multipart part headers too large".into()));
            }
            if !self.fill().await? {
                return Err(Error::Protocol(
                    "multipart body ended inside part headers".into(),
                ));
            }
        }
    }

    /// Pulls the next chunk from the stream. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            next = self.stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }
}

fn parse_headers(block: &[u8]) -> PartHeaders {
    let text = String::from_utf8_lossy(block);
    PartHeaders(
        text.split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect(),
    )
}
