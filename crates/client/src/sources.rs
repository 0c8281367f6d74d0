//! HTTP-backed implementations of the page, entity and collection contracts.

use std::collections::HashSet;
use std::sync::Arc;

use harvester_core::{AppConfig, CancelToken, CollectionSource, EntitySource, Error, PayloadFormat, Record};
use scraper::{Html, Selector};

use crate::fetch::{FetchClient, RawPayload, canonicalize};
use crate::formats::{JsonFields, JsonRecordFormat};
use crate::pagination::{Page, PageFetcher, PaginatedExtractor};
use crate::transport::{Transport, TransportError};

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Fetches listing pages from `base_url + page_path`.
///
/// `page_path` placeholders: `{parent}`, `{offset}`, `{limit}`.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: FetchClient,
    base_url: String,
    page_path: String,
}

impl HttpPageFetcher {
    pub fn new(client: FetchClient, base_url: impl Into<String>, page_path: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into(), page_path: page_path.into() }
    }

    pub fn from_config(client: FetchClient, config: &AppConfig) -> Self {
        Self::new(client, &config.base_url, &config.page_path)
    }

    pub fn page_url(&self, page: &Page) -> String {
        let path = self
            .page_path
            .replace("{parent}", &encode(&page.parent_id))
            .replace("{offset}", &page.offset.to_string())
            .replace("{limit}", &page.page_size.to_string());
        join_url(&self.base_url, &path)
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, page: &Page) -> Result<RawPayload, TransportError> {
        self.client.get(&self.page_url(page)).await
    }
}

/// Fetches single records.
///
/// JSON sources are read from `base_url + item_path`; for HTML sources the key
/// is the item URL itself and the page title becomes the record name. HTML keys
/// must point at `base_url`'s host and port.
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: FetchClient,
    transport: Transport,
    base_url: String,
    item_path: String,
    payload_format: PayloadFormat,
    json: JsonRecordFormat,
}

impl HttpRecordSource {
    pub fn from_config(client: FetchClient, transport: Transport, config: &AppConfig) -> Self {
        Self {
            client,
            transport,
            base_url: config.base_url.clone(),
            item_path: config.item_path.clone(),
            payload_format: config.payload_format,
            json: JsonRecordFormat::new(JsonFields::from_config(config)),
        }
    }

    pub fn item_url(&self, key: &str) -> Result<String, Error> {
        match self.payload_format {
            PayloadFormat::Json => Ok(join_url(&self.base_url, &self.item_path.replace("{key}", &encode(key)))),
            PayloadFormat::Html => {
                let url = canonicalize(key).map_err(|e| Error::InvalidInput(format!("record key is not a URL: {e}")))?;
                let base = canonicalize(&self.base_url)
                    .map_err(|e| Error::InvalidInput(format!("base_url is not a URL: {e}")))?;

                if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
                    tracing::warn!(key, base_url = %self.base_url, "Rejected item URL outside the upstream host");
                    return Err(Error::InvalidInput(format!("record key `{key}` is not on the upstream host")));
                }
                Ok(url.into())
            }
        }
    }

    fn parse(&self, key: &str, payload: &RawPayload) -> Result<Record, Error> {
        match self.payload_format {
            PayloadFormat::Json => {
                let value = payload
                    .parse_json()
                    .map_err(|e| Error::Upstream(format!("item payload for `{key}` is not JSON: {e}")))?;
                self.json
                    .record_from_value(&value, None)
                    .ok_or_else(|| Error::Upstream(format!("item payload for `{key}` has no key field")))
            }
            PayloadFormat::Html => Ok(html_record(key, payload)),
        }
    }
}

fn html_record(key: &str, payload: &RawPayload) -> Record {
    let document = Html::parse_document(&payload.text());
    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(|t| t.text().collect::<String>()))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());

    let mut record = Record::new(key, title.unwrap_or_else(|| key.to_string()));
    record.url = Some(key.to_string());
    record
}

#[async_trait::async_trait]
impl EntitySource<Record> for HttpRecordSource {
    async fn fetch_one(&self, key: &str, cancel: &CancelToken) -> Result<Record, Error> {
        let url = self.item_url(key)?;
        let payload = self.transport.execute(|| self.client.get(&url), cancel).await?;
        let mut record = self.parse(key, &payload)?;

        // cache entries are addressed by the requested key
        if record.key != key {
            tracing::debug!(requested = key, returned = %record.key, "Upstream returned a different key");
            record.key = key.to_string();
        }

        Ok(record)
    }
}

/// Builds the full collection by extracting every configured parent.
///
/// An extraction that had to fall back counts as a failure, so an incomplete
/// collection never replaces the cached one.
pub struct ExtractorCollectionSource {
    extractor: Arc<PaginatedExtractor<Record>>,
    parents: Vec<String>,
}

impl ExtractorCollectionSource {
    pub fn new(extractor: Arc<PaginatedExtractor<Record>>, parents: Vec<String>) -> Self {
        Self { extractor, parents }
    }
}

#[async_trait::async_trait]
impl CollectionSource<Record> for ExtractorCollectionSource {
    async fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<Record>, Error> {
        if self.parents.is_empty() {
            return Err(Error::Unsupported("no parents configured for collection extraction".into()));
        }

        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for parent in &self.parents {
            let result = self.extractor.extract(parent, cancel).await?;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if result.used_fallback {
                return Err(Error::Upstream(format!("extraction of parent `{parent}` did not complete")));
            }

            for record in result.into_payloads() {
                if seen.insert(record.key.clone()) {
                    records.push(record);
                }
            }
        }

        tracing::info!(parents = self.parents.len(), records = records.len(), "Collection extracted");
        Ok(records)
    }
}
