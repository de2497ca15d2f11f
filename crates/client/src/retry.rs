//! Retry policy for HTTP requests.
//!
//! Transport failures and 5xx responses (except 501) are retried with
//! exponential backoff and full jitter. Everything else is returned to the
//! caller as-is.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Bounds on how long and how often a request is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Lower bound of every backoff wait.
    pub min_wait: Duration,
    /// Upper bound of every backoff wait.
    pub max_wait: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Wait before the retry following attempt `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_with_jitter(attempt, rand::random::<f64>())
    }

    /// Full jitter: `min + min(max - min, min * 2^attempt) * jitter`,
    /// clamped to `[min_wait, max_wait]`.
    fn backoff_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let min = self.min_wait.as_secs_f64();
        let max = self.max_wait.as_secs_f64().max(min);
        let exp = min * 2f64.powi(attempt.min(62) as i32);
        let wait = min + (max - min).min(exp) * jitter.clamp(0.0, 1.0);
        Duration::from_secs_f64(wait.clamp(min, max))
    }
}

/// Whether a response status is worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED
}

/// Sends the request produced by `build` until it succeeds, fails terminally,
/// or runs out of attempts.
///
/// `build` is called once per attempt, so any body it attaches must be cheap
/// to replay. When attempts run out the last 5xx response is returned rather
/// than an error, so the caller can translate the service's error body.
pub(crate) async fn send_with_retry<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut build: F,
) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let result: Result<Response> = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = build().send() => r.map_err(Error::from),
        };
        attempt += 1;

        let retry = match &result {
            Ok(resp) => is_retryable_status(resp.status()),
            Err(e) => e.is_retryable(),
        };
        if !retry || attempt >= max_attempts {
            return result;
        }

        let delay = policy.backoff(attempt - 1);
        match &result {
            Ok(resp) => warn!(
                status = resp.status().as_u16(),
                url = %resp.url(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "server error, retrying"
            ),
            Err(e) => warn!(
                error = %e,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            ),
        }
        drop(result);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
