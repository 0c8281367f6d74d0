//! HTML listing pages: every element matching a selector is one item link.

use std::collections::HashSet;

use harvester_core::{Error, Record};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use crate::fetch::{RawPayload, canonical_key};
use crate::pagination::{ItemNormalizer, NormalizedItem, Page, PayloadValidator, ValidationResult};

/// Harvests item links from HTML listing pages.
///
/// The canonical key is the resolved, canonicalized `href`. `data-tags`
/// (comma-separated) becomes the tag list; other `data-*` attributes are kept
/// as record attributes.
#[derive(Debug, Clone)]
pub struct HtmlLinkFormat {
    selector: Selector,
}

impl HtmlLinkFormat {
    pub fn new(item_selector: &str) -> Result<Self, Error> {
        let selector = Selector::parse(item_selector)
            .map_err(|e| Error::InvalidInput(format!("invalid item selector `{item_selector}`: {e}")))?;
        Ok(Self { selector })
    }

    fn record(&self, element: ElementRef<'_>, base: &Url, parent: &str) -> Option<Record> {
        let href = element.value().attr("href")?;
        let key = canonical_key(base, href).ok()?;

        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let name = if text.is_empty() { key.clone() } else { text };

        let mut tags = Vec::new();
        let mut attributes = Map::new();
        for (attr, value) in element.value().attrs() {
            match attr.strip_prefix("data-") {
                Some("tags") => {
                    tags = value.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect();
                }
                Some(name) => {
                    attributes.insert(name.to_string(), Value::String(value.to_string()));
                }
                None => {}
            }
        }

        Some(Record { key: key.clone(), parent: Some(parent.to_string()), name, url: Some(key), tags, attributes })
    }
}

impl PayloadValidator for HtmlLinkFormat {
    fn validate(&self, payload: &RawPayload) -> ValidationResult {
        if payload.is_empty() {
            return ValidationResult::invalid(["empty body"]);
        }

        if let Some(content_type) = &payload.content_type
            && !content_type.contains("html")
        {
            return ValidationResult::invalid([format!("unexpected content type `{content_type}`")]);
        }

        if Url::parse(&payload.url).is_err() {
            return ValidationResult::invalid([format!("cannot resolve links against `{}`", payload.url)]);
        }

        ValidationResult::valid()
    }
}

impl ItemNormalizer<Record> for HtmlLinkFormat {
    fn normalize(&self, page: &Page, payload: &RawPayload) -> Vec<NormalizedItem<Record>> {
        let Ok(base) = Url::parse(&payload.url) else {
            return Vec::new();
        };

        let document = Html::parse_document(&payload.text());
        let mut seen = HashSet::new();

        document
            .select(&self.selector)
            .filter_map(|element| self.record(element, &base, &page.parent_id))
            .filter(|record| seen.insert(record.key.clone()))
            .map(|record| NormalizedItem::new(record.key.clone(), record))
            .collect()
    }

    fn count_raw(&self, payload: &RawPayload) -> Option<usize> {
        let document = Html::parse_document(&payload.text());
        Some(document.select(&self.selector).count())
    }
}
