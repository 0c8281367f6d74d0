use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harvester_core::{AppConfig, CancelToken};
use tokio::time::Instant;

use super::{ExtractionResult, ItemNormalizer, NormalizedItem, Page, PageFetcher, PageResult, PayloadValidator};
use crate::transport::{Transport, TransportError};

/// Paging limits and failure policy for extraction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractConfig {
    pub page_size: usize,
    pub max_pages: usize,
    /// Fixed pause between consecutive pages.
    pub page_delay: Duration,
    /// Return a fallback result instead of the transport error.
    pub enable_fallback: bool,
    /// Keep items accumulated before the failure in a fallback result.
    pub keep_partial_on_fallback: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 50,
            page_delay: Duration::from_millis(500),
            enable_fallback: true,
            keep_partial_on_fallback: false,
        }
    }
}

impl ExtractConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_pages: config.max_pages,
            page_delay: config.page_delay(),
            enable_fallback: config.enable_fallback,
            keep_partial_on_fallback: config.keep_partial_on_fallback,
        }
    }
}

/// Drives sequential page fetches for one parent into a deduplicated result set.
pub struct PaginatedExtractor<T> {
    fetcher: Arc<dyn PageFetcher>,
    validator: Arc<dyn PayloadValidator>,
    normalizer: Arc<dyn ItemNormalizer<T>>,
    transport: Transport,
    config: ExtractConfig,
}

impl<T> PaginatedExtractor<T> {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>, validator: Arc<dyn PayloadValidator>, normalizer: Arc<dyn ItemNormalizer<T>>,
        transport: Transport, config: ExtractConfig,
    ) -> Self {
        Self { fetcher, validator, normalizer, transport, config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Extract every page of `parent_id` with the configured page size and page budget.
    pub async fn extract(&self, parent_id: &str, cancel: &CancelToken) -> Result<ExtractionResult<T>, TransportError> {
        self.extract_all(parent_id, self.config.page_size, self.config.max_pages, cancel).await
    }

    /// Extract up to `max_pages` pages of `parent_id`.
    ///
    /// # Errors
    ///
    /// With fallback enabled this never fails: a fatal transport error (or
    /// cancellation) yields a result with `used_fallback = true`. Otherwise the
    /// transport error is returned.
    pub async fn extract_all(
        &self, parent_id: &str, page_size: usize, max_pages: usize, cancel: &CancelToken,
    ) -> Result<ExtractionResult<T>, TransportError> {
        let start = Instant::now();
        let page_size = page_size.max(1);

        let mut seen: HashSet<String> = HashSet::new();
        let mut items: Vec<NormalizedItem<T>> = Vec::new();
        let mut requests_made = 0;
        let mut offset = 0;

        for page_index in 0..max_pages {
            if page_index > 0 {
                let paused = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(self.config.page_delay) => Ok(()),
                };
                if let Err(err) = paused {
                    return self.fail(parent_id, err, items, requests_made, start);
                }
            }

            let page = Page { parent_id: parent_id.to_string(), offset, page_size };
            requests_made += 1;

            let payload = match self.transport.execute(|| self.fetcher.fetch(&page), cancel).await {
                Ok(payload) => payload,
                Err(err) => return self.fail(parent_id, err, items, requests_made, start),
            };

            let validation = self.validator.validate(&payload);
            if !validation.is_valid {
                tracing::warn!(
                    parent = parent_id,
                    offset,
                    errors = ?validation.errors,
                    "Invalid page payload, treating as end of data"
                );
                break;
            }

            let normalized = self.normalizer.normalize(&page, &payload);
            let raw_count = self.normalizer.count_raw(&payload).unwrap_or(normalized.len());
            let result = PageResult { items: normalized, raw_count };
            let returned = result.items.len();

            let before = items.len();
            for item in result.items {
                if seen.insert(item.canonical_key.clone()) {
                    items.push(item);
                }
            }

            tracing::debug!(
                parent = parent_id,
                offset,
                raw = result.raw_count,
                added = items.len() - before,
                "Page extracted"
            );

            if returned == 0 || result.raw_count < page_size {
                break;
            }

            offset += page_size;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(parent = parent_id, items = items.len(), requests_made, elapsed_ms, "Extraction complete");

        Ok(ExtractionResult { total_count: items.len(), items, requests_made, elapsed_ms, used_fallback: false })
    }

    fn fail(
        &self, parent_id: &str, err: TransportError, items: Vec<NormalizedItem<T>>, requests_made: usize, start: Instant,
    ) -> Result<ExtractionResult<T>, TransportError> {
        if !self.config.enable_fallback {
            tracing::warn!(parent = parent_id, error = %err, requests_made, "Extraction failed");
            return Err(err);
        }

        let items = if self.config.keep_partial_on_fallback { items } else { Vec::new() };
        tracing::warn!(
            parent = parent_id,
            error = %err,
            requests_made,
            kept = items.len(),
            "Extraction failed, returning fallback result"
        );

        Ok(ExtractionResult {
            total_count: items.len(),
            items,
            requests_made,
            elapsed_ms: start.elapsed().as_millis() as u64,
            used_fallback: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RawPayload;
    use crate::pagination::ValidationResult;
    use crate::transport::{RateLimiter, RetryPolicy};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves pages keyed by offset. Each page is a list of item keys, or an error.
    struct FakePages {
        pages: HashMap<usize, Result<Vec<String>, TransportError>>,
        requested: Mutex<Vec<usize>>,
    }

    impl FakePages {
        fn new(page_size: usize, pages: Vec<Result<Vec<String>, TransportError>>) -> Self {
            let pages = pages.into_iter().enumerate().map(|(i, page)| (i * page_size, page)).collect();
            Self { pages, requested: Mutex::new(Vec::new()) }
        }

        fn ok(page_size: usize, pages: Vec<Vec<String>>) -> Self {
            Self::new(page_size, pages.into_iter().map(Ok).collect())
        }

        fn offsets(&self) -> Vec<usize> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for FakePages {
        async fn fetch(&self, page: &Page) -> Result<RawPayload, TransportError> {
            self.requested.lock().unwrap().push(page.offset);
            let keys = match self.pages.get(&page.offset) {
                Some(Ok(keys)) => keys.clone(),
                Some(Err(err)) => return Err(err.clone()),
                None => Vec::new(),
            };
            Ok(RawPayload::new("fake://page", Some("text/plain"), keys.join(",")))
        }
    }

    /// Comma-separated keys; the literal body `invalid` fails validation.
    struct CsvFormat;

    impl PayloadValidator for CsvFormat {
        fn validate(&self, payload: &RawPayload) -> ValidationResult {
            if payload.text() == "invalid" { ValidationResult::invalid(["unexpected shape"]) } else { ValidationResult::valid() }
        }
    }

    impl ItemNormalizer<String> for CsvFormat {
        fn normalize(&self, _page: &Page, payload: &RawPayload) -> Vec<NormalizedItem<String>> {
            payload
                .text()
                .split(',')
                .filter(|k| !k.is_empty())
                .map(|k| NormalizedItem::new(k, k.to_uppercase()))
                .collect()
        }
    }

    fn extractor(pages: &Arc<FakePages>, config: ExtractConfig) -> PaginatedExtractor<String> {
        let transport = Transport::new(
            Arc::new(RateLimiter::new(Duration::ZERO)),
            RetryPolicy { max_retries: 1, base_delay: Duration::from_millis(10), ..Default::default() },
        );
        PaginatedExtractor::new(pages.clone(), Arc::new(CsvFormat), Arc::new(CsvFormat), transport, config)
    }

    fn config(page_size: usize) -> ExtractConfig {
        ExtractConfig { page_size, max_pages: 10, page_delay: Duration::from_millis(100), ..Default::default() }
    }

    fn keys(result: &ExtractionResult<String>) -> Vec<&str> {
        result.items.iter().map(|i| i.canonical_key.as_str()).collect()
    }

    fn page(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn numbered(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_page_completes_run() {
        let pages = Arc::new(FakePages::ok(20, vec![numbered("a", 20), numbered("b", 20), numbered("c", 20), numbered("d", 7)]));
        let result = extractor(&pages, config(20)).extract("p1", &CancelToken::new()).await.unwrap();

        assert_eq!(result.requests_made, 4);
        assert_eq!(result.total_count, 67);
        assert!(!result.used_fallback);
        assert_eq!(pages.offsets(), vec![0, 20, 40, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_pages_are_deduplicated() {
        let pages = Arc::new(FakePages::ok(2, vec![page(&["a", "b"]), page(&["b", "c"])]));
        let result = extractor(&pages, config(2)).extract("p1", &CancelToken::new()).await.unwrap();

        assert_eq!(keys(&result), vec!["a", "b", "c"]);
        assert_eq!(result.payloads().cloned().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(result.requests_made, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_page_then_empty_page() {
        // first page repeats "a", so it is full on the wire but yields one item
        let pages = Arc::new(FakePages::ok(2, vec![page(&["a", "a"]), page(&["b", "c"]), page(&[])]));
        let result = extractor(&pages, config(2)).extract_all("b1", 2, 10, &CancelToken::new()).await.unwrap();

        assert_eq!(keys(&result), vec!["a", "b", "c"]);
        assert_eq!(result.requests_made, 3);
        assert!(!result.used_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_pages_bounds_the_run() {
        let pages = Arc::new(FakePages::ok(1, vec![page(&["a"]), page(&["b"]), page(&["c"]), page(&["d"])]));
        let result = extractor(&pages, config(1)).extract_all("p1", 1, 2, &CancelToken::new()).await.unwrap();

        assert_eq!(keys(&result), vec!["a", "b"]);
        assert_eq!(result.requests_made, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_page_is_a_soft_stop() {
        let pages = Arc::new(FakePages::ok(2, vec![page(&["a", "b"]), page(&["invalid"]), page(&["c", "d"])]));
        let result = extractor(&pages, config(2)).extract("p1", &CancelToken::new()).await.unwrap();

        assert_eq!(keys(&result), vec!["a", "b"]);
        assert_eq!(result.requests_made, 2);
        assert!(!result.used_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_falls_back_to_empty_result() {
        let pages = Arc::new(FakePages::new(
            2,
            vec![Ok(page(&["a", "b"])), Err(TransportError::ClientError { status: 404 }), Ok(page(&["c"]))],
        ));
        let result = extractor(&pages, config(2)).extract("p1", &CancelToken::new()).await.unwrap();

        assert!(result.used_fallback);
        assert!(result.items.is_empty());
        assert_eq!(result.total_count, 0);
        assert_eq!(result.requests_made, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_can_keep_partial_items() {
        let pages = Arc::new(FakePages::new(
            2,
            vec![Ok(page(&["a", "b"])), Err(TransportError::ClientError { status: 404 }), Ok(page(&["c"]))],
        ));
        let config = ExtractConfig { keep_partial_on_fallback: true, ..config(2) };
        let result = extractor(&pages, config).extract("p1", &CancelToken::new()).await.unwrap();

        assert!(result.used_fallback);
        assert_eq!(keys(&result), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates_without_fallback() {
        let pages = Arc::new(FakePages::new(
            2,
            vec![Ok(page(&["a", "b"])), Err(TransportError::ClientError { status: 404 }), Ok(page(&["c"]))],
        ));
        let config = ExtractConfig { enable_fallback: false, ..config(2) };
        let err = extractor(&pages, config).extract("p1", &CancelToken::new()).await.unwrap_err();

        assert_eq!(err, TransportError::ClientError { status: 404 });
        assert_eq!(pages.offsets(), vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_as_one_request() {
        let pages = Arc::new(FakePages::new(2, vec![Err(TransportError::ServerError { status: 503 })]));
        let config = ExtractConfig { enable_fallback: false, ..config(2) };
        let err = extractor(&pages, config).extract("p1", &CancelToken::new()).await.unwrap_err();

        assert!(matches!(err, TransportError::MaxRetriesExceeded { attempts: 2, .. }));
        assert_eq!(pages.offsets(), vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_separated_by_page_delay() {
        let pages = Arc::new(FakePages::ok(1, vec![page(&["a"]), page(&["b"]), page(&[])]));
        let start = Instant::now();
        let result = extractor(&pages, config(1)).extract("p1", &CancelToken::new()).await.unwrap();

        assert_eq!(result.requests_made, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_page_delay() {
        let pages = Arc::new(FakePages::ok(1, vec![page(&["a"]), page(&["b"]), page(&["c"])]));
        let slow = extractor(&pages, ExtractConfig { page_delay: Duration::from_secs(10), ..config(1) });
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = slow.extract("p1", &cancel).await.unwrap();
        assert!(result.used_fallback);
        assert_eq!(result.requests_made, 1);

        let strict = ExtractConfig { enable_fallback: false, ..slow.config().clone() };
        let pages = Arc::new(FakePages::ok(1, vec![page(&["a"]), page(&["b"])]));
        let err = extractor(&pages, strict).extract("p1", &cancel).await.unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
        assert!(pages.offsets().is_empty());
    }
}
