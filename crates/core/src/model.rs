//! Cached entity types.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value the entity service can cache, keyed by a stable identifier.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable identifier used for cache keys and collection upserts.
    fn key(&self) -> &str;
}

/// Normalized record ingested from the upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    /// Canonical key (identifier or canonical URL).
    pub key: String,

    /// Parent the record was listed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Remaining upstream fields, kept verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parent: None,
            name: name.into(),
            url: None,
            tags: Vec::new(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the record was listed under `parent`.
    pub fn has_parent(&self, parent: &str, case_insensitive: bool) -> bool {
        self.parent.as_deref().is_some_and(|p| text_matches(p, parent, case_insensitive))
    }

    /// Whether any tag equals `tag`.
    pub fn has_tag(&self, tag: &str, case_insensitive: bool) -> bool {
        self.tags.iter().any(|t| text_matches(t, tag, case_insensitive))
    }
}

impl Entity for Record {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Exact or case-insensitive comparison. Whitespace is significant.
pub fn text_matches(value: &str, needle: &str, case_insensitive: bool) -> bool {
    if case_insensitive { value.to_lowercase() == needle.to_lowercase() } else { value == needle }
}
