//! Error handling for the blechat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Engine error: {0}")]
    Engine(#[from] blechat_core::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),

    #[error("Peer {0} was not seen before the scan ended")]
    PeerNotFound(String),

    #[error("Chat server did not start: {0}")]
    ServerNotStarted(String),

    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(feature = "ble")]
impl From<blechat_ble::BleError> for CliError {
    fn from(err: blechat_ble::BleError) -> Self {
        CliError::Adapter(err.to_string())
    }
}
