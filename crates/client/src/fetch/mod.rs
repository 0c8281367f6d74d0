//! Single-attempt HTTP GET with status classification.
//!
//! ### Behavior
//! - One request per call; retries belong to `Transport`
//! - Per-request timeout from config
//! - 4xx/5xx become classified `TransportError`s, `Retry-After` is kept for 429
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use bytes::Bytes;
use reqwest::{Client, header};
use std::borrow::Cow;
use std::time::{Duration, Instant};

pub use url::{UrlError, canonical_key, canonicalize};

use harvester_core::AppConfig;

use crate::transport::{TransportError, classify_status};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "harvester/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "harvester/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), ..Default::default() }
    }
}

/// Raw upstream response body with the metadata validators need.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub body: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl RawPayload {
    /// Build a 200 payload from an in-memory body.
    pub fn new(url: impl Into<String>, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
            fetch_ms: 0,
        }
    }

    pub fn json(url: impl Into<String>, value: &serde_json::Value) -> Self {
        Self::new(url, Some("application/json"), value.to_string())
    }

    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(url, Some("text/html; charset=utf-8"), body.into())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn parse_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }
}

/// HTTP fetch client. Each call is exactly one request.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// GET `url` once, returning the body or a classified error.
    pub async fn get(&self, url: &str) -> Result<RawPayload, TransportError> {
        let start = Instant::now();

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json,text/html;q=0.9,*/*;q=0.8")
            .send()
            .await?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status, response.headers()) {
            tracing::debug!(url, status, "upstream returned error status");
            return Err(err);
        }

        let limit = self.config.max_bytes as u64;
        if let Some(len) = response.content_length()
            && len > limit
        {
            return Err(TransportError::TooLarge { size: len, limit });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await?;
        if body.len() as u64 > limit {
            return Err(TransportError::TooLarge { size: body.len() as u64, limit });
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(url, final_url = %final_url, fetch_ms, bytes = body.len(), "fetched upstream page");

        Ok(RawPayload { url: final_url, status, content_type, body, fetch_ms })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}
