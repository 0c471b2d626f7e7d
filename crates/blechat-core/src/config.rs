//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::MAX_ATTRIBUTE_LEN;

// ----------------------------------------------------------------------------
// Advertising Settings
// ----------------------------------------------------------------------------

/// Trade-off between discovery latency and power draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Requested transmit power level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPower {
    UltraLow,
    Low,
    Medium,
    High,
}

impl TxPower {
    /// Approximate level in dBm, for stacks that take a number
    pub fn dbm(self) -> i16 {
        match self {
            Self::UltraLow => -21,
            Self::Low => -15,
            Self::Medium => -7,
            Self::High => 1,
        }
    }
}

/// How the peripheral advertises the chat service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub tx_power: TxPower,
    /// Accept connections from centrals that see the advertisement
    pub connectable: bool,
    /// Put the local device name in the advertising payload
    pub include_name: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            tx_power: TxPower::High,
            connectable: true,
            include_name: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Configuration shared by both session roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name the peripheral advertises
    pub device_name: String,
    /// Longest outgoing payload in bytes; longer text is refused locally
    pub max_payload_len: usize,
    /// Give up on a link stuck before `Ready`; `None` waits forever
    pub connect_timeout: Option<Duration>,
    /// Only report advertisements that carry the chat service UUID
    pub filter_by_service: bool,
    pub advertise: AdvertiseSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "blechat".to_string(),
            max_payload_len: MAX_ATTRIBUTE_LEN,
            connect_timeout: None,
            filter_by_service: false,
            advertise: AdvertiseSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set maximum outgoing payload length
    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable or disable service filtering while scanning
    pub fn with_service_filter(mut self, enabled: bool) -> Self {
        self.filter_by_service = enabled;
        self
    }

    pub fn with_advertise_settings(mut self, settings: AdvertiseSettings) -> Self {
        self.advertise = settings;
        self
    }
}
