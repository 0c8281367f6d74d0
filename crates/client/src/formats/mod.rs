//! Payload validators and normalizers for the supported page formats.

pub mod html;
pub mod json;

use std::sync::Arc;

use harvester_core::{AppConfig, Error, PayloadFormat, Record};

use crate::pagination::{ItemNormalizer, PayloadValidator};

pub use html::HtmlLinkFormat;
pub use json::{JsonFields, JsonRecordFormat};

/// Validator and normalizer pair for one payload format.
#[derive(Clone)]
pub struct RecordFormat {
    pub validator: Arc<dyn PayloadValidator>,
    pub normalizer: Arc<dyn ItemNormalizer<Record>>,
}

impl RecordFormat {
    /// Build the format selected by `payload_format`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        match config.payload_format {
            PayloadFormat::Json => {
                let format = Arc::new(JsonRecordFormat::new(JsonFields::from_config(config)));
                Ok(Self { validator: format.clone(), normalizer: format })
            }
            PayloadFormat::Html => {
                let format = Arc::new(HtmlLinkFormat::new(&config.item_selector)?);
                Ok(Self { validator: format.clone(), normalizer: format })
            }
        }
    }
}
