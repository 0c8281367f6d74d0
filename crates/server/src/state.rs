//! Wiring from configuration to the running pipeline.

use std::sync::Arc;

use harvester_client::{
    ExtractConfig, ExtractorCollectionSource, FetchClient, FetchConfig, HttpPageFetcher, HttpRecordSource,
    PaginatedExtractor, RecordFormat, Transport,
};
use harvester_core::{AppConfig, CancelToken, EntityService, Error, PersistentStore, Record, ServiceOptions};

/// Shared handles used by the tools and the refresh loop.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EntityService<Record>>,
    pub extractor: Arc<PaginatedExtractor<Record>>,
    pub cancel: CancelToken,
}

impl AppState {
    /// Build transport, extractor and entity service over `store`.
    ///
    /// One transport (and so one rate limiter) is shared by page and item fetches.
    pub fn from_config(config: &AppConfig, store: Arc<dyn PersistentStore>, cancel: CancelToken) -> Result<Self, Error> {
        let client = FetchClient::new(FetchConfig::from_config(config))?;
        let transport = Transport::from_config(config);
        let format = RecordFormat::from_config(config)?;

        let extractor = Arc::new(PaginatedExtractor::new(
            Arc::new(HttpPageFetcher::from_config(client.clone(), config)),
            format.validator,
            format.normalizer,
            transport.clone(),
            ExtractConfig::from_config(config),
        ));

        let records = Arc::new(HttpRecordSource::from_config(client, transport, config));
        let mut service = EntityService::new(store, records, ServiceOptions::from_config(config)).with_cancel(cancel.clone());

        if !config.parents.is_empty() {
            let collection = ExtractorCollectionSource::new(Arc::clone(&extractor), config.parents.clone());
            service = service.with_collection_source(Arc::new(collection));
        }

        Ok(Self { service: Arc::new(service), extractor, cancel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_core::{MemoryStore, Served};

    #[tokio::test]
    async fn test_without_parents_collection_is_cache_only() {
        let state = AppState::from_config(&AppConfig::default(), Arc::new(MemoryStore::new()), CancelToken::new()).unwrap();
        assert_eq!(state.service.get_all(true).await.unwrap(), Served::Cached(Vec::new()));
    }

    #[tokio::test]
    async fn test_bad_selector_fails_wiring() {
        let config = AppConfig {
            payload_format: harvester_core::PayloadFormat::Html,
            item_selector: "a[[".into(),
            ..Default::default()
        };
        assert!(AppState::from_config(&config, Arc::new(MemoryStore::new()), CancelToken::new()).is_err());
    }
}
