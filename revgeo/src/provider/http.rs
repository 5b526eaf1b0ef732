//! HTTP client abstraction for testability

use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER};

use super::types::{BoxFuture, ProviderError};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// The parts of an HTTP response the geocoding adapter looks at.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Retry-After` header in seconds, when present and numeric.
    pub retry_after: Option<f64>,
    /// Lower-cased `Content-Type` header.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the body claims to be JSON.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
    }
}

/// Trait for HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs an authenticated HTTP GET request.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    /// * `bearer` - Access token sent as `Authorization: Bearer ...`
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// transport-level failures are errors.
    fn get<'a>(
        &'a self,
        url: &'a str,
        bearer: &'a str,
    ) -> BoxFuture<'a, Result<HttpResponse, ProviderError>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with the default timeout.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a new ReqwestClient with custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::Client(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(
        &'a self,
        url: &'a str,
        bearer: &'a str,
    ) -> BoxFuture<'a, Result<HttpResponse, ProviderError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .bearer_auth(bearer)
                .header(CACHE_CONTROL, "no-store")
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ProviderError::Transport(format!("Request timed out: {}", e))
                    } else {
                        ProviderError::Transport(format!("Request failed: {}", e))
                    }
                })?;

            let status = response.status().as_u16();
            let headers = response.headers();
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite());
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_ascii_lowercase);

            let body = response
                .bytes()
                .await
                .map_err(|e| ProviderError::Transport(format!("Failed to read response: {}", e)))?
                .to_vec();

            Ok(HttpResponse {
                status,
                retry_after,
                content_type,
                body,
            })
        })
    }
}
