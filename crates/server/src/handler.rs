//! MCP server handler implementation.
//!
//! Routes tool calls to the implementations in `tools`, sharing one `AppState`.

use crate::state::AppState;
use crate::tools::{
    CachePurgeParams, CollectionFilterParams, CollectionGetParams, EntityGetParams, EntityInvalidateParams,
    EntityRefreshParams, ExtractParams, cache, collection, entity, extract,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for harvester.
#[derive(Clone)]
pub struct HarvesterServer {
    tool_router: ToolRouter<Self>,
    state: AppState,
}

#[tool_router]
impl HarvesterServer {
    pub fn new(state: AppState) -> Self {
        Self { tool_router: Self::tool_router(), state }
    }

    #[tool(
        description = "Walk every page of a parent listing and return the deduplicated records. Does not read or write the cache."
    )]
    async fn extract_all(&self, params: Parameters<ExtractParams>) -> Result<CallToolResult, McpError> {
        extract::extract_impl(&self.state.extractor, &self.state.cancel, params.0).await
    }

    #[tool(
        description = "Get one record by key. Serves the cache first, fetches on a miss, and falls back to a stale copy when upstream fails."
    )]
    async fn entity_get(&self, params: Parameters<EntityGetParams>) -> Result<CallToolResult, McpError> {
        entity::get_impl(&self.state.service, params.0).await
    }

    #[tool(description = "Re-fetch one record from upstream, serving the stale copy if the fetch fails.")]
    async fn entity_refresh(&self, params: Parameters<EntityRefreshParams>) -> Result<CallToolResult, McpError> {
        entity::refresh_impl(&self.state.service, params.0).await
    }

    #[tool(description = "Drop one cached record so the next entity_get fetches it from upstream.")]
    async fn entity_invalidate(&self, params: Parameters<EntityInvalidateParams>) -> Result<CallToolResult, McpError> {
        entity::invalidate_impl(&self.state.service, params.0).await
    }

    #[tool(description = "Get the full cached collection, extracting every configured parent on a miss or when forced.")]
    async fn collection_get(&self, params: Parameters<CollectionGetParams>) -> Result<CallToolResult, McpError> {
        collection::get_impl(&self.state.service, params.0).await
    }

    #[tool(description = "Filter the cached collection by parent and/or tag. Never contacts upstream.")]
    async fn collection_filter(&self, params: Parameters<CollectionFilterParams>) -> Result<CallToolResult, McpError> {
        collection::filter_impl(&self.state.service, params.0).await
    }

    #[tool(
        description = "Purge cached records: only expired ones, or all of them (optionally with the cached collection)."
    )]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        cache::purge_impl(&self.state.service, params.0).await
    }
}

impl ServerHandler for HarvesterServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "harvester".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
