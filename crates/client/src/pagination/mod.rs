//! Paginated extraction contracts and result types.
//!
//! A run walks pages of one parent in increasing offset order. Each page is
//! fetched through `Transport`, gated by a `PayloadValidator`, turned into
//! `NormalizedItem`s by an `ItemNormalizer`, and deduplicated by canonical key.

mod extractor;

use serde::Serialize;

use crate::fetch::RawPayload;
use crate::transport::TransportError;

pub use extractor::{ExtractConfig, PaginatedExtractor};

/// Request descriptor for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub parent_id: String,
    pub offset: usize,
    pub page_size: usize,
}

/// Items normalized from one page.
#[derive(Debug, Clone)]
pub struct PageResult<T> {
    pub items: Vec<NormalizedItem<T>>,
    /// Raw entries on the page before normalization and dedup. Drives the completion rule.
    pub raw_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedItem<T> {
    pub canonical_key: String,
    pub payload: T,
}

impl<T> NormalizedItem<T> {
    pub fn new(canonical_key: impl Into<String>, payload: T) -> Self {
        Self { canonical_key: canonical_key.into(), payload }
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult<T> {
    pub items: Vec<NormalizedItem<T>>,
    pub total_count: usize,
    /// Page fetches attempted, including a failing one. Transport retries are not counted.
    pub requests_made: usize,
    pub elapsed_ms: u64,
    pub used_fallback: bool,
}

impl<T> ExtractionResult<T> {
    pub fn payloads(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|item| &item.payload)
    }

    pub fn into_payloads(self) -> Vec<T> {
        self.items.into_iter().map(|item| item.payload).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    pub fn invalid(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { is_valid: false, errors: errors.into_iter().map(Into::into).collect() }
    }
}

/// Fetches one page. A single attempt; retries are the transport's job.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, page: &Page) -> Result<RawPayload, TransportError>;
}

/// Structural check of a page payload. A failure ends the run without an error.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, payload: &RawPayload) -> ValidationResult;
}

/// Turns a page payload into keyed items.
pub trait ItemNormalizer<T>: Send + Sync {
    fn normalize(&self, page: &Page, payload: &RawPayload) -> Vec<NormalizedItem<T>>;

    /// Number of raw entries on the page, when the format can tell.
    ///
    /// Defaults to the normalized item count.
    fn count_raw(&self, _payload: &RawPayload) -> Option<usize> {
        None
    }
}
