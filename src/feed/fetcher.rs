use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_url, UrlValidationError};

/// Deadline applied to every single fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest body accepted from a single fetch.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur during a fetch.
///
/// All of them are network-class failures: the conversion aborts when the
/// feed fetch fails, while a failed image fetch only drops that image.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// URL is malformed or points somewhere we refuse to fetch
    #[error("Refusing to fetch URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Response body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Single-shot HTTP GET with a hard deadline.
///
/// The fetcher never interprets what it downloads; callers decide whether
/// the bytes are a feed document or an image. There are no retries: each
/// call is one request, bounded by [`Fetcher::timeout`]. Dropping the
/// returned future cancels the request.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_response_bytes: usize,
    allow_private_hosts: bool,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allow_private_hosts: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    /// Permit loopback and private-range hosts (self-hosted feeds, tests).
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `url` and return the raw response body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - unparseable, non-HTTP(S), or private host
    /// - [`FetchError::Timeout`] - the whole exchange, body included, exceeded the deadline
    /// - [`FetchError::Network`] - connection or TLS errors
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - body exceeded the size limit
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = validate_url(url, self.allow_private_hosts)?;

        tracing::debug!(url = %parsed, "Fetching");
        let bytes = tokio::time::timeout(self.timeout, self.fetch_unbounded(parsed))
            .await
            .map_err(|_| {
                tracing::warn!(url = %url, timeout = ?self.timeout, "Fetch deadline exceeded");
                FetchError::Timeout(self.timeout)
            })??;

        tracing::debug!(url = %url, bytes = bytes.len(), "Fetched");
        Ok(bytes)
    }

    async fn fetch_unbounded(&self, url: url::Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_response_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> Fetcher {
        Fetcher::new(reqwest::Client::new()).allow_private_hosts(true)
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw bytes".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let bytes = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"raw bytes");
    }

    #[tokio::test]
    async fn test_fetch_404_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_attempted_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = test_fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = test_fetcher().with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = fetcher.fetch(&format!("{}/slow", mock_server.uri())).await;

        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "caller must not wait for the transport"
        );
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&mock_server)
            .await;

        let fetcher = test_fetcher().with_max_response_bytes(1024);
        let result = fetcher.fetch(&format!("{}/big", mock_server.uri())).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge(1024))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_private_host_by_default() {
        let fetcher = Fetcher::new(reqwest::Client::new());
        let result = fetcher.fetch("http://127.0.0.1:9/feed").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let result = test_fetcher().fetch("file:///etc/passwd").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 9 (discard) is almost never listening
        let result = test_fetcher().fetch("http://127.0.0.1:9/feed").await;
        assert!(matches!(
            result,
            Err(FetchError::Network(_)) | Err(FetchError::Timeout(_))
        ));
    }
}
