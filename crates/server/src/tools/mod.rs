//! MCP tool implementations.
//!
//! This module contains all tools exposed by the harvester server.

pub mod cache;
pub mod collection;
pub mod entity;
pub mod extract;

pub use cache::CachePurgeParams;
pub use collection::{CollectionFilterParams, CollectionGetParams};
pub use entity::{EntityGetParams, EntityInvalidateParams, EntityRefreshParams};
pub use extract::ExtractParams;

use harvester_core::Error;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

/// Serialize `output` as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
