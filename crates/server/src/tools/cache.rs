//! cache_purge tool implementation.
//!
//! Drops cached entities (all or only expired ones) and optionally the cached collection.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use harvester_core::{EntityService, Error, Record};

use super::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Drop only entities whose TTL has passed.
    #[serde(default)]
    pub expired_only: bool,

    /// Drop every cached entity.
    #[serde(default)]
    pub all: bool,

    /// Also drop the cached collection (only with `all`).
    #[serde(default)]
    pub include_collection: bool,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
    /// Entries left under the service namespace.
    pub remaining: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(service: &EntityService<Record>, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let deleted = match (params.expired_only, params.all) {
        (true, false) if !params.include_collection => service.purge_expired().await?,
        (false, true) => service.purge(params.include_collection).await?,
        _ => {
            return Err(Error::InvalidInput(
                "Exactly one of expired_only or all must be set; include_collection requires all".to_string(),
            )
            .into());
        }
    };

    let output = CachePurgeOutput { deleted, remaining: service.cached_count().await? };
    json_result(&output)
}
