//! Error types for the radio adapters

use blechat_core::{PeerAddress, TransportError};
use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while driving the platform Bluetooth stack
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Device not seen in any scan: {0}")]
    UnknownDevice(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Server instance is not open")]
    ServerNotOpen,

    #[cfg(feature = "central")]
    #[error("btleplug: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[cfg(all(feature = "peripheral", target_os = "linux"))]
    #[error("BlueZ: {0}")]
    Bluez(#[from] bluer::Error),
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::AdapterNotAvailable => TransportError::unavailable(err.to_string()),
            BleError::UnknownDevice(handle) => TransportError::UnknownPeer {
                address: PeerAddress::new(handle),
            },
            BleError::ServerNotOpen => TransportError::rejected("server request", err.to_string()),
            other => TransportError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_missing_maps_to_unavailable() {
        let err: TransportError = BleError::AdapterNotAvailable.into();
        assert!(matches!(err, TransportError::Unavailable { .. }));
    }

    #[test]
    fn test_unknown_device_keeps_handle() {
        let err: TransportError = BleError::UnknownDevice("hci0/dev_AA".into()).into();
        assert_eq!(
            err,
            TransportError::UnknownPeer {
                address: PeerAddress::new("hci0/dev_AA")
            }
        );
    }

    #[test]
    fn test_missing_characteristic_is_a_failure() {
        let err: TransportError = BleError::CharacteristicNotFound(Uuid::nil()).into();
        assert!(matches!(err, TransportError::Failed(ref msg) if msg.contains("not found")));
    }
}
