//! Error types for the chat engine
//!
//! Adapter implementations report failures with [`TransportError`]. The
//! session actors never hand those back to their callers; they turn them into
//! message log entries. [`EngineError`] only covers lifecycle problems with the
//! actors themselves.

use thiserror::Error;

use crate::types::PeerAddress;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures reported by a transport adapter when issuing a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bluetooth transport is not available: {reason}")]
    Unavailable { reason: String },

    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("Unknown peer: {address}")]
    UnknownPeer { address: PeerAddress },

    #[error("Unknown or closed link {link}")]
    UnknownLink { link: u64 },

    #[error("Operation failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Shorthand for [`TransportError::Unavailable`]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`TransportError::Rejected`]
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by session handles
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session actor has stopped")]
    ActorStopped,
}

/// Result type for engine operations
pub type Result<T> = core::result::Result<T, EngineError>;

/// Result type for transport adapter operations
pub type TransportResult<T> = core::result::Result<T, TransportError>;
