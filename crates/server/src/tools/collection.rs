//! collection_get and collection_filter tool implementations.
//!
//! `collection_get` reads (or refreshes) the cached collection. `collection_filter`
//! only ever reads what is cached.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use harvester_core::{EntityService, Error, Record};

use super::json_result;

/// Parameters for the collection_get tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CollectionGetParams {
    /// Re-extract every configured parent instead of serving the cache (default: false).
    #[serde(default)]
    pub force_refresh: bool,
}

/// Parameters for the collection_filter tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CollectionFilterParams {
    /// Keep records listed under this parent.
    #[serde(default)]
    pub parent: Option<String>,

    /// Keep records carrying this tag.
    #[serde(default)]
    pub tag: Option<String>,

    /// Compare case-insensitively (default: true).
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

/// Output from the collection tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CollectionOutput {
    /// One of "fresh", "cached", "stale" or "filtered".
    pub source: String,
    pub stale: bool,
    pub count: usize,
    pub records: Vec<Record>,
}

/// Implementation of the collection_get tool.
pub async fn get_impl(
    service: &EntityService<Record>, params: CollectionGetParams,
) -> Result<CallToolResult, McpError> {
    let served = service.get_all(params.force_refresh).await?;
    let source = served.source().to_string();
    let stale = served.is_stale();
    let records = served
        .into_value()
        .ok_or_else(|| Error::NotFound(format!("collection `{}`", service.options().collection_name)))?;

    json_result(&CollectionOutput { source, stale, count: records.len(), records })
}

/// Implementation of the collection_filter tool.
///
/// Both filters apply when both are given.
pub async fn filter_impl(
    service: &EntityService<Record>, params: CollectionFilterParams,
) -> Result<CallToolResult, McpError> {
    // Needles are matched verbatim; only empty strings count as absent.
    let parent = params.parent.as_deref().filter(|s| !s.is_empty());
    let tag = params.tag.as_deref().filter(|s| !s.is_empty());
    let ci = params.case_insensitive;

    let records = match (parent, tag) {
        (None, None) => return Err(Error::InvalidInput("at least one of parent or tag is required".into()).into()),
        (Some(parent), None) => service.get_by_parent(parent, ci).await?,
        (None, Some(tag)) => service.get_by_tag(tag, ci).await?,
        (Some(parent), Some(tag)) => service.get_by_filter(|r| r.has_parent(parent, ci) && r.has_tag(tag, ci)).await?,
    };

    json_result(&CollectionOutput { source: "filtered".into(), stale: false, count: records.len(), records })
}
