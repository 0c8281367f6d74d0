//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HARVESTER_*)
//! 2. TOML config file (if HARVESTER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Shape of the payloads returned by the page endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// A JSON object holding an array of item objects.
    Json,
    /// An HTML listing page whose items are anchors matched by `item_selector`.
    Html,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HARVESTER_*)
/// 2. TOML config file (if HARVESTER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via HARVESTER_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Base URL of the upstream source, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Page endpoint template. Must contain `{parent}` and `{offset}`; `{limit}` is optional.
    #[serde(default = "default_page_path")]
    pub page_path: String,

    /// Single item endpoint template. Must contain `{key}`.
    #[serde(default = "default_item_path")]
    pub item_path: String,

    /// Payload format served by the page endpoint.
    #[serde(default = "default_payload_format")]
    pub payload_format: PayloadFormat,

    /// JSON field holding the item array of a page.
    #[serde(default = "default_items_field")]
    pub items_field: String,

    /// JSON field holding an item's identifier.
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// JSON field holding an item's display name.
    #[serde(default = "default_name_field")]
    pub name_field: String,

    /// JSON field holding an item's canonical URL, if any.
    #[serde(default = "default_url_field")]
    pub url_field: String,

    /// JSON field holding an item's tag list.
    #[serde(default = "default_tags_field")]
    pub tags_field: String,

    /// CSS selector matching item anchors on HTML listing pages.
    #[serde(default = "default_item_selector")]
    pub item_selector: String,

    /// Parent identifiers whose pages make up the full collection.
    ///
    /// When empty, collection refreshes are disabled and only cached data is served.
    #[serde(default)]
    pub parents: Vec<String>,

    /// Name of the cached collection holding every known record.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request HTTP timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing between outbound calls in milliseconds.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling in milliseconds on a server's `Retry-After` hint.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,

    /// HTTP status codes that trigger a retry.
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,

    /// Items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on pages fetched per extraction.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Fixed delay between consecutive pages in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Return an empty fallback result instead of failing an extraction.
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Keep items accumulated before a fatal failure when falling back.
    #[serde(default)]
    pub keep_partial_on_fallback: bool,

    /// Entity cache TTL in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Interval of the background refresh loop in seconds. Zero disables the loop.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./harvester-cache.sqlite")
}

fn default_base_url() -> String {
    "http://localhost:8080".into()
}

fn default_page_path() -> String {
    "/parents/{parent}/items?offset={offset}&limit={limit}".into()
}

fn default_item_path() -> String {
    "/items/{key}".into()
}

fn default_payload_format() -> PayloadFormat {
    PayloadFormat::Json
}

fn default_items_field() -> String {
    "items".into()
}

fn default_key_field() -> String {
    "id".into()
}

fn default_name_field() -> String {
    "name".into()
}

fn default_url_field() -> String {
    "url".into()
}

fn default_tags_field() -> String {
    "tags".into()
}

fn default_item_selector() -> String {
    "a[href]".into()
}

fn default_collection_name() -> String {
    "all".into()
}

fn default_user_agent() -> String {
    "harvester/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_after_ms() -> u64 {
    60_000
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_page_size() -> usize {
    20
}

fn default_max_pages() -> usize {
    50
}

fn default_page_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    86_400 // 24h
}

fn default_refresh_interval_secs() -> u64 {
    3_600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            base_url: default_base_url(),
            page_path: default_page_path(),
            item_path: default_item_path(),
            payload_format: default_payload_format(),
            items_field: default_items_field(),
            key_field: default_key_field(),
            name_field: default_name_field(),
            url_field: default_url_field(),
            tags_field: default_tags_field(),
            item_selector: default_item_selector(),
            parents: Vec::new(),
            collection_name: default_collection_name(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_retry_after_ms: default_max_retry_after_ms(),
            retryable_status_codes: default_retryable_status_codes(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            enable_fallback: true,
            keep_partial_on_fallback: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Per-request timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Refresh loop interval, or `None` when the loop is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HARVESTER_`
    /// 2. TOML file from `HARVESTER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HARVESTER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HARVESTER_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the TOML cannot be parsed or validation fails.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
