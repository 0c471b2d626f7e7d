//! Transport adapter capability interface
//!
//! The engine drives the radio through [`CentralTransport`] and
//! [`PeripheralTransport`]. Their methods only issue a request and return;
//! the outcome comes back later through an event sink ([`ScanEvents`],
//! [`LinkEvents`], [`ServerEvents`]) that the session hands to the adapter.
//!
//! Each sink is stamped with the generation id of the scan cycle, link or
//! server instance it belongs to and feeds the owning session's mailbox, so
//! events from a superseded instance are recognised and dropped there.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::central::CentralInput;
use crate::config::AdvertiseSettings;
use crate::errors::TransportResult;
use crate::peripheral::PeripheralInput;
use crate::protocol::{GattService, GattTable};
use crate::types::{LinkId, PeerAddress, PeerHandle, RequestId, ScanId, ServerId};

// ----------------------------------------------------------------------------
// Central Role Events
// ----------------------------------------------------------------------------

/// One advertisement sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub address: PeerAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub handle: PeerHandle,
    /// Service UUIDs listed in the advertisement
    pub services: Vec<Uuid>,
}

impl Observation {
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }
}

/// Outcome reported for an outbound link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// Discovery finished; `Err` carries the stack's failure status
    ServicesDiscovered(Result<GattTable, String>),
    /// The CCCD write issued by `enable_notifications` completed
    DescriptorWritten { ok: bool },
    /// The remote pushed a value
    Notification { characteristic: Uuid, value: Vec<u8> },
}

/// Sink for advertisement sightings of one scan cycle
#[derive(Debug, Clone)]
pub struct ScanEvents {
    scan: ScanId,
    mailbox: mpsc::UnboundedSender<CentralInput>,
}

impl ScanEvents {
    pub(crate) fn new(scan: ScanId, mailbox: mpsc::UnboundedSender<CentralInput>) -> Self {
        Self { scan, mailbox }
    }

    pub fn id(&self) -> ScanId {
        self.scan
    }

    /// Report a sighting; returns `false` once the session has gone away
    pub fn observe(&self, observation: Observation) -> bool {
        self.mailbox
            .send(CentralInput::Scan(self.scan, observation))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Sink for everything that happens on one outbound link
#[derive(Debug, Clone)]
pub struct LinkEvents {
    link: LinkId,
    mailbox: mpsc::UnboundedSender<CentralInput>,
}

impl LinkEvents {
    pub(crate) fn new(link: LinkId, mailbox: mpsc::UnboundedSender<CentralInput>) -> Self {
        Self { link, mailbox }
    }

    pub fn id(&self) -> LinkId {
        self.link
    }

    /// Deliver an event; returns `false` once the session has gone away
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.mailbox
            .send(CentralInput::Link(self.link, event))
            .is_ok()
    }

    pub fn connected(&self) -> bool {
        self.emit(LinkEvent::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.emit(LinkEvent::Disconnected)
    }

    pub fn services_discovered(&self, result: Result<GattTable, String>) -> bool {
        self.emit(LinkEvent::ServicesDiscovered(result))
    }

    pub fn descriptor_written(&self, ok: bool) -> bool {
        self.emit(LinkEvent::DescriptorWritten { ok })
    }

    pub fn notification(&self, characteristic: Uuid, value: Vec<u8>) -> bool {
        self.emit(LinkEvent::Notification {
            characteristic,
            value,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Peripheral Role Events
// ----------------------------------------------------------------------------

/// Status sent back for a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure,
}

/// Something a remote central did to our server, or advertiser feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionStateChanged {
        device: PeerAddress,
        connected: bool,
    },
    DescriptorWriteRequest {
        device: PeerAddress,
        request: RequestId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    CharacteristicWriteRequest {
        device: PeerAddress,
        request: RequestId,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    AdvertisingStarted,
    AdvertisingFailed {
        code: i32,
    },
}

/// Sink for everything that happens on one opened server instance
#[derive(Debug, Clone)]
pub struct ServerEvents {
    server: ServerId,
    mailbox: mpsc::UnboundedSender<PeripheralInput>,
}

impl ServerEvents {
    pub(crate) fn new(server: ServerId, mailbox: mpsc::UnboundedSender<PeripheralInput>) -> Self {
        Self { server, mailbox }
    }

    pub fn id(&self) -> ServerId {
        self.server
    }

    /// Deliver an event; returns `false` once the session has gone away
    pub fn emit(&self, event: ServerEvent) -> bool {
        self.mailbox
            .send(PeripheralInput::Server(self.server, event))
            .is_ok()
    }

    pub fn connection_state_changed(&self, device: PeerAddress, connected: bool) -> bool {
        self.emit(ServerEvent::ConnectionStateChanged { device, connected })
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Capability Traits
// ----------------------------------------------------------------------------

/// Radio operations the central session needs
#[async_trait]
pub trait CentralTransport: Send + Sync + 'static {
    /// Whether an adapter is present and powered
    fn is_available(&self) -> bool;

    /// Begin reporting advertisements to `events`, optionally only those
    /// listing `filter`
    async fn start_scan(&self, filter: Option<Uuid>, events: ScanEvents) -> TransportResult<()>;

    async fn stop_scan(&self) -> TransportResult<()>;

    /// Begin connecting to the device behind `peer`; progress arrives on `events`
    async fn connect(&self, peer: &PeerHandle, events: LinkEvents) -> TransportResult<()>;

    /// Request service discovery on a connected link
    async fn discover_services(&self, link: LinkId) -> TransportResult<()>;

    /// Subscribe locally and write the CCCD enable value; completion arrives
    /// as [`LinkEvent::DescriptorWritten`]
    async fn enable_notifications(&self, link: LinkId, characteristic: Uuid)
        -> TransportResult<()>;

    /// Queue a characteristic write; `Ok` means the stack accepted it
    async fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()>;

    /// Tear the link down and release everything held for it
    async fn disconnect(&self, link: LinkId) -> TransportResult<()>;
}

/// Radio operations the peripheral session needs
#[async_trait]
pub trait PeripheralTransport: Send + Sync + 'static {
    /// Whether an adapter is present and powered
    fn is_available(&self) -> bool;

    /// Open a GATT server instance whose callbacks go to `events`
    async fn open_server(&self, events: ServerEvents) -> TransportResult<()>;

    async fn publish_service(&self, server: ServerId, service: &GattService)
        -> TransportResult<()>;

    /// Start advertising `service`; `Err(Unavailable)` means no advertiser
    async fn start_advertising(
        &self,
        server: ServerId,
        settings: &AdvertiseSettings,
        local_name: &str,
        service: Uuid,
    ) -> TransportResult<()>;

    async fn stop_advertising(&self, server: ServerId) -> TransportResult<()>;

    /// Update the stored value of a published characteristic
    async fn set_value(
        &self,
        server: ServerId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()>;

    /// Push the current value of `characteristic` to one subscribed device
    async fn notify(
        &self,
        server: ServerId,
        device: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()>;

    /// Answer a write request that asked for a response
    async fn respond(
        &self,
        server: ServerId,
        device: &PeerAddress,
        request: RequestId,
        status: GattStatus,
    ) -> TransportResult<()>;

    /// Release the server and every service published on it
    async fn close_server(&self, server: ServerId) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_close_with_their_session() {
        let (central_tx, central_rx) = mpsc::unbounded_channel();
        let scan = ScanEvents::new(ScanId::new(1), central_tx.clone());
        let link = LinkEvents::new(LinkId::new(1), central_tx);
        assert!(!scan.is_closed());
        assert!(link.connected());

        drop(central_rx);
        assert!(scan.is_closed());
        assert!(link.is_closed());
        assert!(!link.disconnected());

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let server = ServerEvents::new(ServerId::new(1), server_tx);
        assert!(!server.is_closed());
        drop(server_rx);
        assert!(server.is_closed());
        assert!(!server.emit(ServerEvent::AdvertisingStarted));
    }
}
