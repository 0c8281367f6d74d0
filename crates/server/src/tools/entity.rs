//! entity_get, entity_refresh and entity_invalidate tool implementations.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use harvester_core::{EntityService, Error, Record, Served};

use super::json_result;

/// Parameters for the entity_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityGetParams {
    /// Item key as used upstream.
    pub key: String,

    /// Skip the cache and fetch from upstream (default: false).
    #[serde(default)]
    pub force_refresh: bool,
}

/// Parameters for the entity_refresh tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityRefreshParams {
    /// Item key as used upstream.
    pub key: String,
}

/// Parameters for the entity_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityInvalidateParams {
    /// Item key to drop from the cache.
    pub key: String,
}

/// Output from the entity_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityInvalidateOutput {
    pub key: String,
    /// Whether a cached entry existed and was removed.
    pub removed: bool,
}

/// Output shared by entity_get and entity_refresh.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityOutput {
    pub key: String,
    /// One of "fresh", "cached" or "stale".
    pub source: String,
    /// True when upstream failed and the cached value was served instead.
    pub stale: bool,
    pub record: Record,
    /// RFC 3339 time the cached value was fetched.
    pub fetched_at: Option<String>,
    /// RFC 3339 time the cached value expires.
    pub expires_at: Option<String>,
}

/// Implementation of the entity_get tool.
pub async fn get_impl(service: &EntityService<Record>, params: EntityGetParams) -> Result<CallToolResult, McpError> {
    let key = validate_key(&params.key)?;
    let served = service.get(key, params.force_refresh).await?;
    respond(service, key, served).await
}

/// Implementation of the entity_refresh tool.
pub async fn refresh_impl(
    service: &EntityService<Record>, params: EntityRefreshParams,
) -> Result<CallToolResult, McpError> {
    let key = validate_key(&params.key)?;
    let served = service.refresh(key).await?;
    respond(service, key, served).await
}

/// Implementation of the entity_invalidate tool.
///
/// The next `entity_get` for the key fetches from upstream.
pub async fn invalidate_impl(
    service: &EntityService<Record>, params: EntityInvalidateParams,
) -> Result<CallToolResult, McpError> {
    let key = validate_key(&params.key)?;
    let removed = service.invalidate(key).await?;
    json_result(&EntityInvalidateOutput { key: key.to_string(), removed })
}

fn validate_key(key: &str) -> Result<&str, Error> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidInput("key must not be empty".into()));
    }
    Ok(key)
}

async fn respond(service: &EntityService<Record>, key: &str, served: Served<Record>) -> Result<CallToolResult, McpError> {
    let source = served.source().to_string();
    let stale = served.is_stale();
    let record = served.into_value().ok_or_else(|| Error::NotFound(key.to_string()))?;
    let entry = service.entry(key).await?;

    let output = EntityOutput {
        key: key.to_string(),
        source,
        stale,
        record,
        fetched_at: entry.as_ref().map(|e| e.fetched_at.to_rfc3339()),
        expires_at: entry.as_ref().map(|e| e.expires_at.to_rfc3339()),
    };

    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{FakeUpstream, result_json, service};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn params(key: &str, force_refresh: bool) -> EntityGetParams {
        EntityGetParams { key: key.into(), force_refresh }
    }

    #[tokio::test]
    async fn test_get_impl_fetches_then_serves_cache() {
        let upstream = FakeUpstream::with(vec![Record::new("sku-1", "Runner").with_parent("acme")]);
        let svc = service(&upstream, Duration::from_secs(3600));

        let first = result_json(&get_impl(&svc, params("sku-1", false)).await.unwrap());
        assert_eq!(first["source"], "fresh");
        assert_eq!(first["record"]["name"], "Runner");
        assert!(first["fetched_at"].is_string());
        assert!(first["expires_at"].is_string());

        let second = result_json(&get_impl(&svc, params(" sku-1 ", false)).await.unwrap());
        assert_eq!(second["source"], "cached");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_impl_serves_stale_on_upstream_failure() {
        let upstream = FakeUpstream::with(vec![Record::new("sku-1", "Runner")]);
        let svc = service(&upstream, Duration::from_secs(3600));
        get_impl(&svc, params("sku-1", false)).await.unwrap();

        upstream.fail();
        let json = result_json(&refresh_impl(&svc, EntityRefreshParams { key: "sku-1".into() }).await.unwrap());

        assert_eq!(json["source"], "stale");
        assert_eq!(json["stale"], true);
        assert_eq!(json["record"]["key"], "sku-1");
    }

    #[tokio::test]
    async fn test_get_impl_unknown_key_is_not_found() {
        let upstream = FakeUpstream::with(Vec::new());
        let svc = service(&upstream, Duration::from_secs(3600));

        let err = get_impl(&svc, params("ghost", false)).await.unwrap_err();
        assert_eq!(err.code.0, -32001);
    }

    #[tokio::test]
    async fn test_invalidate_impl_forces_next_fetch() {
        let upstream = FakeUpstream::with(vec![Record::new("sku-1", "Runner")]);
        let svc = service(&upstream, Duration::from_secs(3600));
        get_impl(&svc, params("sku-1", false)).await.unwrap();

        let invalidate = |key: &str| EntityInvalidateParams { key: key.into() };
        let json = result_json(&invalidate_impl(&svc, invalidate("sku-1")).await.unwrap());
        assert_eq!(json["removed"], true);
        let again = result_json(&invalidate_impl(&svc, invalidate("sku-1")).await.unwrap());
        assert_eq!(again["removed"], false);

        let json = result_json(&get_impl(&svc, params("sku-1", false)).await.unwrap());
        assert_eq!(json["source"], "fresh");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(invalidate_impl(&svc, invalidate(" ")).await.is_err());
    }

    #[tokio::test]
    async fn test_get_impl_rejects_blank_key() {
        let upstream = FakeUpstream::with(Vec::new());
        let svc = service(&upstream, Duration::from_secs(3600));

        assert!(get_impl(&svc, params("   ", false)).await.is_err());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }
}
