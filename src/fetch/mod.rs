//! HTTP retrieval of catalog and thread documents.
//!
//! [`ChanFetcher`] wraps a shared `reqwest::Client` with a request timeout
//! and a response size cap. 404 is reported as [`FetchError::NotFound`] so
//! the watchers can tell a deleted thread from a transient failure.
//! Decoding is left to the site's [`ChanReader`](crate::site::ChanReader).

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::config::NetworkConfig;

/// Errors that can occur while fetching a remote document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The thread or board no longer exists (HTTP 404)
    #[error("Not found")]
    NotFound,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests
    #[error("Rate limited")]
    RateLimited,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Transport knobs, normally taken from the `[network]` config section.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_response_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for FetchSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_response_bytes: config.max_response_bytes,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ChanFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ChanFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(Self { client, settings })
    }

    /// Fetch `url` and return the full response body.
    ///
    /// Every call makes exactly one request. A failed fetch is retried by the
    /// next scheduled watch cycle or filter pass, not here.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotFound`] - HTTP 404
    /// - [`FetchError::RateLimited`] - HTTP 429
    /// - [`FetchError::HttpStatus`] - any other non-2xx status
    /// - [`FetchError::Timeout`] - no response within the configured timeout
    /// - [`FetchError::ResponseTooLarge`] - body over `max_response_bytes`
    /// - [`FetchError::IncompleteResponse`] - body shorter than Content-Length
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = tokio::time::timeout(self.settings.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(url = %url, "Rate limited");
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, self.settings.max_response_bytes).await
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
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
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
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ChanFetcher {
        ChanFetcher::new(FetchSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ck/catalog.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&mock_server)
            .await;

        let body = fetcher()
            .fetch(&format!("{}/ck/catalog.json", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_fetch_404_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::NotFound)));
    }

    #[tokio::test]
    async fn test_fetch_403_fails_immediately() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(403))));
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ck/catalog.json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .fetch(&format!("{}/ck/catalog.json", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rate_limited_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::RateLimited)));
    }

    #[tokio::test]
    async fn test_fetch_response_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&mock_server)
            .await;

        let fetcher = ChanFetcher::new(FetchSettings {
            max_response_bytes: 16,
            ..FetchSettings::default()
        })
        .unwrap();
        let result = fetcher.fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }
}
