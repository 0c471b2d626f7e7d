//! Radio adapters for the blechat engine
//!
//! Implements the capability traits from `blechat-core` on real hardware:
//!
//! - [`central::BtleplugCentral`] - scanning and client links via btleplug (feature `central`)
//! - [`peripheral::PlatformPeripheral`] - GATT server and advertising via BlueZ on Linux
//!   (feature `peripheral`), with a fallback that reports the radio as unavailable
//!   everywhere else

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

#[cfg(feature = "central")]
pub mod central;
pub mod error;
pub mod peripheral;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

#[cfg(feature = "central")]
pub use central::BtleplugCentral;
pub use error::BleError;
pub use peripheral::PlatformPeripheral;
