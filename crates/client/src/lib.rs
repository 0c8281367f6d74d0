//! Client code for harvester.
//!
//! This crate provides the rate-limited retrying transport, the paginated
//! extractor, payload formats, and HTTP-backed sources for the entity service.

pub mod fetch;
pub mod formats;
pub mod pagination;
pub mod sources;
pub mod transport;

pub use fetch::{FetchClient, FetchConfig, RawPayload};
pub use formats::{HtmlLinkFormat, JsonFields, JsonRecordFormat, RecordFormat};
pub use pagination::{
    ExtractConfig, ExtractionResult, ItemNormalizer, NormalizedItem, Page, PageFetcher, PageResult, PaginatedExtractor,
    PayloadValidator, ValidationResult,
};
pub use sources::{ExtractorCollectionSource, HttpPageFetcher, HttpRecordSource};
pub use transport::{RateLimiter, RetryPolicy, Transport, TransportError};
