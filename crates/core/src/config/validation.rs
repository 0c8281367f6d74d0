//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` or `base_url` is empty
    /// - `page_size`, `max_pages` or `base_delay_ms` is 0
    /// - `page_path` lacks `{parent}` or `{offset}`, or `item_path` lacks `{key}`
    /// - `collection_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.base_url.is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }

        if self.page_size == 0 {
            return Err(invalid("page_size", "must be greater than 0"));
        }
        if self.max_pages == 0 {
            return Err(invalid("max_pages", "must be greater than 0"));
        }
        if self.base_delay_ms == 0 {
            return Err(invalid("base_delay_ms", "must be greater than 0"));
        }

        if !self.page_path.contains("{parent}") || !self.page_path.contains("{offset}") {
            return Err(invalid("page_path", "must contain {parent} and {offset} placeholders"));
        }
        if !self.item_path.contains("{key}") {
            return Err(invalid("item_path", "must contain a {key} placeholder"));
        }

        if self.collection_name.is_empty() {
            return Err(invalid("collection_name", "must not be empty"));
        }

        if self.parents.is_empty() {
            tracing::warn!("no parents configured; collection refreshes will only serve cached data");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_zero_page_size() {
        let config = AppConfig { page_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "page_size"));
    }

    #[test]
    fn test_validate_zero_base_delay() {
        let config = AppConfig { base_delay_ms: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "base_delay_ms"));
    }

    #[test]
    fn test_validate_page_path_placeholders() {
        let config = AppConfig { page_path: "/items?page={offset}".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "page_path"));
    }

    #[test]
    fn test_validate_item_path_placeholder() {
        let config = AppConfig { item_path: "/items".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "item_path"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { timeout_ms: 100, page_size: 1, max_pages: 1, max_retries: 0, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
