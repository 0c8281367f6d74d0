//! JSON page payloads: an object holding an array of item objects.

use harvester_core::{AppConfig, Record};
use serde_json::{Map, Value};

use crate::fetch::RawPayload;
use crate::pagination::{ItemNormalizer, NormalizedItem, Page, PayloadValidator, ValidationResult};

/// Field names used to map upstream objects onto `Record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFields {
    /// Field holding the item array. Empty means the payload itself is the array.
    pub items: String,
    pub key: String,
    pub name: String,
    pub url: String,
    pub tags: String,
    /// Read only when the page does not supply the parent (single-item payloads).
    pub parent: String,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            items: "items".into(),
            key: "id".into(),
            name: "name".into(),
            url: "url".into(),
            tags: "tags".into(),
            parent: "parent".into(),
        }
    }
}

impl JsonFields {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            items: config.items_field.clone(),
            key: config.key_field.clone(),
            name: config.name_field.clone(),
            url: config.url_field.clone(),
            tags: config.tags_field.clone(),
            ..Default::default()
        }
    }
}

/// Validates and normalizes JSON listing pages into records.
#[derive(Debug, Clone, Default)]
pub struct JsonRecordFormat {
    fields: JsonFields,
}

impl JsonRecordFormat {
    pub fn new(fields: JsonFields) -> Self {
        Self { fields }
    }

    fn items<'a>(&self, root: &'a Value) -> Option<&'a Vec<Value>> {
        if self.fields.items.is_empty() { root.as_array() } else { root.get(&self.fields.items)?.as_array() }
    }

    /// Map one upstream object onto a record. Objects without a usable key are skipped.
    pub fn record_from_value(&self, value: &Value, parent: Option<&str>) -> Option<Record> {
        let object = value.as_object()?;
        let key = scalar_string(object.get(&self.fields.key)?)?;
        if key.is_empty() {
            return None;
        }

        let name = object.get(&self.fields.name).and_then(scalar_string).unwrap_or_else(|| key.clone());
        let url = object.get(&self.fields.url).and_then(Value::as_str).map(str::to_string);
        let tags = object.get(&self.fields.tags).map(tag_list).unwrap_or_default();
        let parent = match parent {
            Some(parent) => Some(parent.to_string()),
            None => object.get(&self.fields.parent).and_then(scalar_string),
        };

        let consumed = [&self.fields.key, &self.fields.name, &self.fields.url, &self.fields.tags, &self.fields.parent];
        let attributes: Map<String, Value> =
            object.iter().filter(|(k, _)| !consumed.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect();

        Some(Record { key, parent, name, url, tags, attributes })
    }
}

impl PayloadValidator for JsonRecordFormat {
    fn validate(&self, payload: &RawPayload) -> ValidationResult {
        let root = match payload.parse_json() {
            Ok(root) => root,
            Err(e) => return ValidationResult::invalid([format!("body is not JSON: {e}")]),
        };

        match self.items(&root) {
            Some(_) => ValidationResult::valid(),
            None if self.fields.items.is_empty() => ValidationResult::invalid(["payload is not an array"]),
            None => ValidationResult::invalid([format!("missing array field `{}`", self.fields.items)]),
        }
    }
}

impl ItemNormalizer<Record> for JsonRecordFormat {
    fn normalize(&self, page: &Page, payload: &RawPayload) -> Vec<NormalizedItem<Record>> {
        let Ok(root) = payload.parse_json() else {
            return Vec::new();
        };
        let Some(items) = self.items(&root) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|value| {
                let record = self.record_from_value(value, Some(&page.parent_id));
                if record.is_none() {
                    tracing::debug!(parent = %page.parent_id, field = %self.fields.key, "Skipping item without key");
                }
                record
            })
            .map(|record| NormalizedItem::new(record.key.clone(), record))
            .collect()
    }

    fn count_raw(&self, payload: &RawPayload) -> Option<usize> {
        let root = payload.parse_json().ok()?;
        self.items(&root).map(Vec::len)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Tags as an array of strings, or a single comma-separated string.
fn tag_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values.iter().filter_map(scalar_string).collect(),
        Value::String(s) => s.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Page {
        Page { parent_id: "acme".into(), offset: 0, page_size: 20 }
    }

    #[test]
    fn test_validate_requires_items_array() {
        let format = JsonRecordFormat::default();
        assert!(format.validate(&RawPayload::json("u", &json!({"items": []}))).is_valid);

        let missing = format.validate(&RawPayload::json("u", &json!({"data": []})));
        assert!(!missing.is_valid);
        assert!(missing.errors[0].contains("items"));

        assert!(!format.validate(&RawPayload::html("u", "<html></html>")).is_valid);
    }

    #[test]
    fn test_bare_array_payload() {
        let format = JsonRecordFormat::new(JsonFields { items: String::new(), ..Default::default() });
        let payload = RawPayload::json("u", &json!([{"id": "a"}, {"id": "b"}]));

        assert!(format.validate(&payload).is_valid);
        assert_eq!(format.count_raw(&payload), Some(2));
        assert_eq!(format.normalize(&page(), &payload).len(), 2);
    }

    #[test]
    fn test_normalize_maps_fields() {
        let format = JsonRecordFormat::default();
        let payload = RawPayload::json(
            "u",
            &json!({"items": [
                {"id": 42, "name": "Runner", "url": "https://shop.example/p/42", "tags": ["sale", "new"], "price": 90},
                {"id": "b7", "tags": "a, b,,"},
            ]}),
        );

        let items = format.normalize(&page(), &payload);
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.canonical_key, "42");
        assert_eq!(first.payload.name, "Runner");
        assert_eq!(first.payload.parent.as_deref(), Some("acme"));
        assert_eq!(first.payload.url.as_deref(), Some("https://shop.example/p/42"));
        assert_eq!(first.payload.tags, vec!["sale", "new"]);
        assert_eq!(first.payload.attributes.get("price"), Some(&json!(90)));
        assert!(!first.payload.attributes.contains_key("id"));

        assert_eq!(items[1].payload.name, "b7");
        assert_eq!(items[1].payload.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_items_without_key_are_skipped_but_counted() {
        let format = JsonRecordFormat::default();
        let payload = RawPayload::json("u", &json!({"items": [{"id": "a"}, {"name": "no key"}, {"id": ""}]}));

        assert_eq!(format.normalize(&page(), &payload).len(), 1);
        assert_eq!(format.count_raw(&payload), Some(3));
    }

    #[test]
    fn test_single_item_reads_parent_field() {
        let format = JsonRecordFormat::default();
        let record = format.record_from_value(&json!({"id": "a", "parent": "acme"}), None).unwrap();
        assert_eq!(record.parent.as_deref(), Some("acme"));
        assert!(record.attributes.is_empty());

        let listed = format.record_from_value(&json!({"id": "a", "parent": "other"}), Some("acme")).unwrap();
        assert_eq!(listed.parent.as_deref(), Some("acme"));
    }

    #[test]
    fn test_custom_field_names() {
        let format = JsonRecordFormat::new(JsonFields {
            items: "results".into(),
            key: "sku".into(),
            name: "title".into(),
            ..Default::default()
        });
        let payload = RawPayload::json("u", &json!({"results": [{"sku": "X1", "title": "Widget"}]}));

        let items = format.normalize(&page(), &payload);
        assert_eq!(items[0].canonical_key, "X1");
        assert_eq!(items[0].payload.name, "Widget");
    }
}
