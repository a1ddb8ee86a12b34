//! Shared HTTP client for HTTP-based providers and probes
//!
//! One `reqwest::Client` is built per registry and reused across calls.
//! Requests are sent exactly once; retries are the dispatcher's job.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use taskrelay_utils::{ErrorKind, ProviderError};
use tracing::debug;

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body excerpt carried into error messages
const ERROR_BODY_EXCERPT: usize = 500;

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Build a client with pooled connections.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderError::invalid_argument(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    #[must_use]
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a request once under a hard timeout and classify the outcome.
    ///
    /// Non-success statuses become errors of the matching kind; the caller
    /// only ever sees a 2xx response.
    pub async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        provider: &str,
    ) -> Result<Response, ProviderError> {
        debug!(provider, timeout_secs = timeout.as_secs(), "Executing HTTP request");

        let response = match request.timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(ProviderError::timeout(timeout).with_provider(provider));
            }
            Err(e) => {
                return Err(ProviderError::new(
                    ErrorKind::Network,
                    format!("{provider} request failed: {e}"),
                )
                .with_provider(provider));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let mut error = map_status(status, provider, &body);
        if let Some(delay) = retry_after {
            error = error.with_retry_after(delay);
        }
        Err(error)
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status to an error kind.
///
/// - 401/403 → `Authentication`
/// - 400/422 → `InvalidRequest`
/// - 404 → `InvalidArgument` (unknown model or endpoint)
/// - 408 → `Timeout`
/// - 429 → `RateLimited`
/// - 503 → `ServiceUnavailable`
/// - anything else → `ApiError` carrying the status
pub(crate) fn map_status(status: StatusCode, provider: &str, body: &str) -> ProviderError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Authentication,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::InvalidRequest,
        StatusCode::NOT_FOUND => ErrorKind::InvalidArgument,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceUnavailable,
        _ => ErrorKind::ApiError,
    };

    let excerpt: String = body.trim().chars().take(ERROR_BODY_EXCERPT).collect();
    let message = if excerpt.is_empty() {
        format!("{provider} returned {status}")
    } else {
        format!("{provider} returned {status}: {excerpt}")
    };

    ProviderError::new(kind, message)
        .with_provider(provider)
        .with_status(status.as_u16())
}
