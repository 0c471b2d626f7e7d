//! Connection and messaging engine for a two-role BLE GATT chat
//!
//! One device runs a [`PeripheralSession`]: it publishes the chat service,
//! advertises it and pushes chat lines to every central that enabled
//! notifications. The other runs a [`CentralSession`]: it scans, connects,
//! negotiates the chat characteristic and writes chat lines to it.
//!
//! ## Architecture
//!
//! - [`types`] - Peer, message and generation id types
//! - [`protocol`] - Service and characteristic UUIDs, GATT table model, payload codec
//! - [`registry`] - Address-keyed set of discovered peers
//! - [`message_log`] - Append-only log the UI renders
//! - [`transport`] - Capability traits radio adapters implement
//! - [`central`] / [`peripheral`] - The two session actors
//! - [`sim`] - In-memory radio for tests and demos
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use blechat_core::sim::{ScriptedDevice, SimRadio};
//! use blechat_core::{CentralSession, CentralState, EngineConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> blechat_core::Result<()> {
//! let radio = SimRadio::new();
//! radio.add_device(ScriptedDevice::chat("AA:BB", Some("echo")).with_echo());
//!
//! let central = CentralSession::spawn(Arc::new(radio.central("C0")), EngineConfig::default());
//! central.start_scan()?;
//! central.flush().await?;
//! central.connect_address("AA:BB")?;
//! central.flush().await?;
//! assert_eq!(central.state(), CentralState::Ready);
//!
//! central.send("hello")?;
//! central.flush().await?;
//! assert!(central.messages().iter().any(|m| m.text == "hello" && !m.from_self()));
//!
//! for message in central.messages() {
//!     println!("{}", message);
//! }
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod central;
pub mod config;
pub mod errors;
pub mod message_log;
pub mod peripheral;
pub mod protocol;
pub mod registry;
pub mod sim;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use central::{CentralHandle, CentralSession, CentralState};
pub use config::{AdvertiseMode, AdvertiseSettings, EngineConfig, TxPower};
pub use errors::{EngineError, Result, TransportError, TransportResult};
pub use message_log::MessageLog;
pub use peripheral::{PeripheralHandle, PeripheralSession, PeripheralState};
pub use protocol::{CCCD_UUID, CHAT_SERVICE_UUID, MESSAGE_CHARACTERISTIC_UUID};
pub use registry::{PeerRegistry, PeerTable};
pub use transport::{
    CentralTransport, GattStatus, LinkEvent, LinkEvents, Observation, PeripheralTransport,
    ScanEvents, ServerEvent, ServerEvents,
};
pub use types::{
    LinkId, Message, MessageKind, Origin, Peer, PeerAddress, PeerHandle, RequestId, ScanId,
    ServerId,
};
