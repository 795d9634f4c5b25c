//! Entity store configuration
//!
//! Loaded from JSON; every field has a default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::observability::Severity;
use crate::storage::{StoreError, StoreResult};

/// Smallest accepted target shard size
pub const MIN_TARGET_SHARD_SIZE: u64 = 1024;

/// Entity store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Average shard size the store aims for, in bytes (default: 10 MiB)
    #[serde(default = "default_target_shard_size")]
    pub target_shard_size_bytes: u64,

    /// fsync every rewritten shard when its cursor finishes (default: true)
    #[serde(default = "default_sync_on_close")]
    pub sync_on_close: bool,

    /// Lowest severity written to the log (default: INFO)
    #[serde(default = "default_log_level")]
    pub log_level: Severity,
}

fn default_target_shard_size() -> u64 {
    10 * 1024 * 1024
}

fn default_sync_on_close() -> bool {
    true
}

fn default_log_level() -> Severity {
    Severity::Info
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            target_shard_size_bytes: default_target_shard_size(),
            sync_on_close: default_sync_on_close(),
            log_level: default_log_level(),
        }
    }
}

impl StoreConfig {
    /// Create a config with the given target shard size
    pub fn with_target_shard_size(bytes: u64) -> Self {
        Self {
            target_shard_size_bytes: bytes,
            ..Default::default()
        }
    }

    /// Parse a config from JSON
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StoreError::config_invalid("Invalid config JSON").with_details(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn read_from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::config_file(path, e))?;
        Self::from_json(&content)
    }

    /// Checks value ranges
    pub fn validate(&self) -> StoreResult<()> {
        if self.target_shard_size_bytes < MIN_TARGET_SHARD_SIZE {
            return Err(StoreError::config_invalid(format!(
                "target_shard_size_bytes must be at least {}, got {}",
                MIN_TARGET_SHARD_SIZE, self.target_shard_size_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreErrorCode;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.target_shard_size_bytes, 10 * 1024 * 1024);
        assert!(config.sync_on_close);
        assert_eq!(config.log_level, Severity::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StoreConfig::from_json(r#"{"target_shard_size_bytes": 4096}"#).unwrap();
        assert_eq!(config.target_shard_size_bytes, 4096);
        assert!(config.sync_on_close);
    }

    #[test]
    fn test_rejects_tiny_target() {
        let err = StoreConfig::from_json(r#"{"target_shard_size_bytes": 10}"#).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::ConfigInvalid);
        assert!(StoreConfig::with_target_shard_size(1023).validate().is_err());
    }

    #[test]
    fn test_read_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(
            &path,
            r#"{"sync_on_close": false, "log_level": "WARN"}"#,
        )
        .unwrap();
        let config = StoreConfig::read_from_file(&path).unwrap();
        assert!(!config.sync_on_close);
        assert_eq!(config.log_level, Severity::Warn);

        let missing = StoreConfig::read_from_file(&temp.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.code(), StoreErrorCode::ConfigInvalid);
    }
}
