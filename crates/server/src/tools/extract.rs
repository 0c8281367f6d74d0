//! extract_all tool implementation.
//!
//! Runs one paginated extraction for a parent without touching the cache.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use harvester_client::PaginatedExtractor;
use harvester_core::{CancelToken, Error, Record};

use super::json_result;

/// Parameters for the extract_all tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractParams {
    /// Parent identifier to list items for (e.g. a brand or category).
    pub parent_id: String,

    /// Items requested per page. Defaults to the configured page size.
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Maximum number of pages to request. Defaults to the configured budget.
    #[serde(default)]
    pub max_pages: Option<usize>,
}

/// Output from the extract_all tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractOutput {
    pub parent_id: String,
    pub total_count: usize,
    pub requests_made: usize,
    pub elapsed_ms: u64,
    /// True when a fatal upstream error ended the run early.
    pub used_fallback: bool,
    pub records: Vec<Record>,
}

/// Implementation of the extract_all tool.
pub async fn extract_impl(
    extractor: &PaginatedExtractor<Record>, cancel: &CancelToken, params: ExtractParams,
) -> Result<CallToolResult, McpError> {
    let parent_id = params.parent_id.trim();
    if parent_id.is_empty() {
        return Err(Error::InvalidInput("parent_id must not be empty".into()).into());
    }
    if params.page_size == Some(0) {
        return Err(Error::InvalidInput("page_size must be at least 1".into()).into());
    }

    let config = extractor.config();
    let page_size = params.page_size.unwrap_or(config.page_size);
    let max_pages = params.max_pages.unwrap_or(config.max_pages);

    let result = extractor
        .extract_all(parent_id, page_size, max_pages, cancel)
        .await
        .map_err(Error::from)?;

    tracing::info!(
        parent_id,
        total = result.total_count,
        requests = result.requests_made,
        used_fallback = result.used_fallback,
        "extract_all finished"
    );

    let output = ExtractOutput {
        parent_id: parent_id.to_string(),
        total_count: result.total_count,
        requests_made: result.requests_made,
        elapsed_ms: result.elapsed_ms,
        used_fallback: result.used_fallback,
        records: result.into_payloads(),
    };

    json_result(&output)
}
