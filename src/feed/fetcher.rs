use crate::feed::parser::{parse_feed, Feed};
use reqwest::header::USER_AGENT;
use std::time::Duration;
use thiserror::Error;

/// Sent with every request. Some origins (reddit among them) refuse
/// generic crawler agents.
pub const AGENT: &str = "rss2email (https://github.com/skx/rss2email)";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Every attempt failed; carries the last failure.
    #[error("Error processing {url} after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

/// How often and how patiently a feed is re-requested.
///
/// Attempt `n` (zero-based) waits `n * base_delay` first, so the first
/// request goes out immediately and later ones back off linearly.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BASE_DELAY)
    }
}

/// Retrieves feeds over HTTP.
///
/// Cloning is cheap; the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Fetcher {
    /// Build a fetcher with its own client and the default retry policy.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, RetryPolicy::default()))
    }

    /// Use a caller-supplied client. TLS and pooling are whatever it was built with.
    pub fn with_client(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Single GET of `url`, returning the body as text.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded 30 seconds
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.client.get(url).header(USER_AGENT, AGENT).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_body(response, MAX_FEED_SIZE).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch and parse `url`, retrying on any failure.
    ///
    /// Network and parse failures are treated alike. Once every attempt has
    /// failed the last error is returned inside [`FetchError::Exhausted`],
    /// which names the URL.
    pub async fn fetch_feed(&self, url: &str) -> Result<Feed, FetchError> {
        let mut attempt = 0;

        loop {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.fetch_and_parse(url).await {
                Ok(feed) => return Ok(feed),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(url = %url, attempts = attempt, error = %e, "Giving up on feed");
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    tracing::debug!(url = %url, attempt = attempt, error = %e, "Feed fetch failed, retrying");
                }
            }
        }
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<Feed, FetchError> {
        let text = self.fetch(url).await?;
        parse_feed(text.as_bytes()).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// Read the whole body, refusing anything over `limit` bytes and anything
/// shorter than its declared `Content-Length`.
async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let declared = response.content_length();
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(FetchError::ResponseTooLarge);
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    match declared {
        Some(expected) if (body.len() as u64) < expected => Err(FetchError::IncompleteResponse {
            expected,
            received: body.len(),
        }),
        _ => Ok(body),
    }
}
