//! Bridge configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::memory::PAGE_SIZE;

/// How host strings are written into module memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringEncoding {
    /// Measure the UTF-8 length first, then allocate once
    Bulk,
    /// Allocate for the ASCII case and reallocate on the first wide character
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Linear memory size at instantiation, in 64 KiB pages
    pub initial_pages: u32,
    pub max_pages: u32,
    /// Bytes reserved for the shadow stack at the bottom of memory
    pub stack_size: u32,
    pub string_encoding: StringEncoding,
    /// Log every capability call
    pub trace_calls: bool,
    /// Viewport of the headless graphics context
    pub viewport: [i32; 2],
    /// Extensions the headless graphics context advertises
    pub extensions: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            initial_pages: 17,
            max_pages: 16384,
            stack_size: 64 * 1024,
            string_encoding: StringEncoding::Incremental,
            trace_calls: false,
            viewport: [800, 600],
            extensions: vec!["EXT_color_buffer_float".to_string()],
        }
    }
}

impl BridgeConfig {
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            serde_json::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.initial_pages == 0 {
            return Err(BridgeError::Config("initial_pages must be at least 1".into()));
        }
        if self.max_pages < self.initial_pages {
            return Err(BridgeError::Config(format!(
                "max_pages ({}) is below initial_pages ({})",
                self.max_pages, self.initial_pages
            )));
        }
        if self.stack_size == 0 || self.stack_size % 16 != 0 {
            return Err(BridgeError::Config(format!(
                "stack_size ({}) must be a non-zero multiple of 16",
                self.stack_size
            )));
        }
        if self.stack_size as usize >= self.initial_pages as usize * PAGE_SIZE {
            return Err(BridgeError::Config(format!(
                "stack_size ({}) leaves no heap in {} initial pages",
                self.stack_size, self.initial_pages
            )));
        }
        if self.viewport.iter().any(|&d| d <= 0) {
            return Err(BridgeError::Config("viewport dimensions must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config =
            BridgeConfig::from_json(r#"{ "string_encoding": "bulk", "trace_calls": true }"#).unwrap();
        assert_eq!(config.string_encoding, StringEncoding::Bulk);
        assert!(config.trace_calls);
        assert_eq!(config.initial_pages, 17);
    }

    #[test]
    fn test_rejects_inconsistent_sizes() {
        assert!(BridgeConfig::from_json(r#"{ "initial_pages": 4, "max_pages": 2 }"#).is_err());
        assert!(BridgeConfig::from_json(r#"{ "stack_size": 100 }"#).is_err());
        assert!(BridgeConfig::from_json(r#"{ "initial_pages": 1, "stack_size": 65536 }"#).is_err());
        assert!(matches!(
            BridgeConfig::from_json("not json"),
            Err(BridgeError::Config(_))
        ));
    }
}
