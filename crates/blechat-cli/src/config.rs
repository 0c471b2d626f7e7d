//! CLI configuration
//!
//! Loaded from a TOML file given with `--config`. Every key is optional;
//! missing keys take their defaults.
//!
//! ```toml
//! scan_seconds = 15
//!
//! [engine]
//! device_name = "kitchen"
//! max_payload_len = 180
//! filter_by_service = true
//! connect_timeout = { secs = 10, nanos = 0 }
//!
//! [engine.advertise]
//! mode = "balanced"
//! tx_power = "medium"
//! ```

use std::path::Path;

use blechat_core::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Seconds a scan runs when neither the command line nor the file says otherwise
pub const DEFAULT_SCAN_SECONDS: u64 = 10;

/// Complete configuration for the CLI application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default duration for `scan` and for the scan phase of `connect`
    pub scan_seconds: u64,
    /// Settings handed to both sessions
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan_seconds: DEFAULT_SCAN_SECONDS,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blechat_core::{AdvertiseMode, TxPower};

    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml(
            r#"
            scan_seconds = 3

            [engine]
            device_name = "kitchen"
            filter_by_service = true
            connect_timeout = { secs = 10, nanos = 0 }

            [engine.advertise]
            mode = "balanced"
            tx_power = "medium"
            "#,
        )
        .unwrap();

        assert_eq!(config.scan_seconds, 3);
        assert_eq!(config.engine.device_name, "kitchen");
        assert!(config.engine.filter_by_service);
        assert_eq!(config.engine.max_payload_len, 512);
        assert_eq!(config.engine.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.engine.advertise.mode, AdvertiseMode::Balanced);
        assert_eq!(config.engine.advertise.tx_power, TxPower::Medium);
        assert!(config.engine.advertise.include_name);
    }

    #[test]
    fn test_bad_toml_is_reported() {
        let err = AppConfig::from_toml("scan_seconds = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::error::CliError::TomlParsing(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::load_from_file("/nonexistent/blechat.toml").unwrap_err();
        assert!(matches!(err, crate::error::CliError::Io(_)));
    }
}
