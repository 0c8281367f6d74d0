//! Periodic background refresh of expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use harvester_core::{CancelToken, EntityService, Error, Record};
use tokio::time::MissedTickBehavior;

/// Run `refresh_expired` every `interval` until `cancel` fires.
///
/// The first pass runs immediately. Failures are logged and the loop keeps going.
pub async fn run(service: Arc<EntityService<Record>>, interval: Duration, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs = interval.as_secs(), "Refresh loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match service.refresh_expired().await {
            Ok(summary) => tracing::debug!(?summary, "Refresh pass finished"),
            Err(Error::Cancelled) => break,
            Err(e) => tracing::warn!(error = %e, "Refresh pass failed"),
        }
    }

    tracing::info!("Refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_core::{CollectionSource, EntitySource, MemoryStore, PersistentStore, ServiceOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        collections: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EntitySource<Record> for CountingSource {
        async fn fetch_one(&self, key: &str, _cancel: &CancelToken) -> Result<Record, Error> {
            Ok(Record::new(key, key))
        }
    }

    #[async_trait::async_trait]
    impl CollectionSource<Record> for CountingSource {
        async fn fetch_all(&self, _cancel: &CancelToken) -> Result<Vec<Record>, Error> {
            self.collections.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Record::new("a", "A")])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_each_interval_until_cancelled() {
        let source = Arc::new(CountingSource::default());
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let options = ServiceOptions { ttl: Duration::ZERO, ..Default::default() };
        let service = Arc::new(
            EntityService::<Record>::new(store, source.clone(), options).with_collection_source(source.clone()),
        );
        let cancel = CancelToken::new();

        let handle = tokio::spawn(run(service, Duration::from_secs(60), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        // passes at t = 0, 60 and 120
        assert_eq!(source.collections.load(Ordering::SeqCst), 3);
    }
}
