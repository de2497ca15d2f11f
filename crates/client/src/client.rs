//! FileHeap HTTP client.
//!
//! Async client using `reqwest` with optional Bearer token authentication.
//! Every request goes through the retry policy and observes the client's
//! cancellation token.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fileheap_api::{ApiError, Dataset};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::BatchLimits;
use crate::buffer_pool::BufferPool;
use crate::dataset::DatasetRef;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, send_with_retry};

const USER_AGENT: &str = concat!("fileheap/", env!("CARGO_PKG_VERSION"));

/// Characters escaped in a URL path. `/` is kept so file paths map onto
/// path segments.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Idle buffers kept for request bodies.
const POOLED_BUFFERS: usize = 8;

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service address in the form `[scheme://]host[:port]`. The scheme
    /// defaults to `https`.
    pub address: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub retry: RetryPolicy,
    pub limits: BatchLimits,
    /// Timeout for small JSON requests.
    pub request_timeout: Duration,
    /// Timeout for a whole batch download response.
    pub batch_timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            retry: RetryPolicy::default(),
            limits: BatchLimits::default(),
            request_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
    buffers: Arc<BufferPool>,
}

/// Handle to a FileHeap service. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a client for the given address with default settings.
    pub fn new(address: &str) -> Result<Self> {
        Self::with_config(ClientConfig::new(address))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base_url = parse_address(&config.address)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::InvalidArgument("token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                config,
                buffers: BufferPool::new(POOLED_BUFFERS),
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a handle whose requests stop when `cancel` is cancelled.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    /// Base URL of the service, without path.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn limits(&self) -> BatchLimits {
        self.inner.config.limits
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn buffers(&self) -> &Arc<BufferPool> {
        &self.inner.buffers
    }

    /// Creates a new, empty dataset.
    pub async fn new_dataset(&self) -> Result<DatasetRef> {
        let url = self.url(&["datasets"]);
        let resp = self.send_json::<()>(Method::POST, url, None).await?;
        let dataset: Dataset = parse_response(resp).await?;
        debug!(dataset = %dataset.id, "created dataset");
        Ok(self.dataset(dataset.id))
    }

    /// References an existing dataset. The reference is not validated.
    pub fn dataset(&self, id: impl Into<String>) -> DatasetRef {
        DatasetRef::new(self.clone(), id.into())
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    /// Builds a URL from path segments. Segments may contain `/`, which is
    /// preserved; everything else is percent-encoded as needed.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut path = String::new();
        for segment in segments {
            let segment = segment.trim_matches('/');
            if segment.is_empty() {
                continue;
            }
            path.push('/');
            path.extend(utf8_percent_encode(segment, PATH));
        }

        let mut url = self.inner.base_url.clone();
        url.set_path(&path);
        url
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.inner.http.request(method, url)
    }

    /// Sends a request with retries. `build` is invoked once per attempt.
    pub(crate) async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        send_with_retry(&self.inner.config.retry, &self.cancel, build).await
    }

    /// Sends a request with an optional JSON body.
    pub(crate) async fn send_json<T: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&T>,
    ) -> Result<Response> {
        let body = match body {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        };
        let timeout = self.inner.config.request_timeout;
        self.send(|| {
            self.request(method.clone(), url.clone())
                .header(CONTENT_TYPE, "application/json")
                .timeout(timeout)
                .body(body.clone())
        })
        .await
    }
}

/// Parses `[scheme://]host[:port]` into a base URL.
fn parse_address(address: &str) -> Result<Url> {
    let invalid = || Error::InvalidAddress(address.to_string());

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{address}")
    };
    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;

    if url.host_str().is_none()
        || url.cannot_be_a_base()
        || !matches!(url.path(), "" | "/")
        || url.query().is_some()
        || url.fragment().is_some()
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return Err(invalid());
    }
    Ok(url)
}

/// Converts an error status into an [`Error`], passing successes through.
pub(crate) async fn check_response(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.as_u16() < 400 {
        return Ok(resp);
    }
    Err(error_from_response(resp).await)
}

/// Reads the service's error body from a failed response.
pub(crate) async fn error_from_response(resp: Response) -> Error {
    let status = resp.status();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => return Error::from(e),
    };

    let message = match serde_json::from_slice::<ApiError>(&body) {
        Ok(api) if !api.message.is_empty() => api.message,
        _ if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
        _ => String::from_utf8_lossy(&body).trim().to_string(),
    };
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

/// Like [`check_response`], mapping 404 to [`Error::NotFound`].
pub(crate) async fn check_found(resp: Response) -> Result<Response> {
    if resp.status() == StatusCode::NOT_FOUND {
        return Err(Error::NotFound);
    }
    check_response(resp).await
}

/// Checks the response and decodes its JSON body.
pub(crate) async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = check_response(resp).await?;
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
