//! In-memory simulated radio
//!
//! A [`SimRadio`] connects any number of [`SimCentral`] and [`SimPeripheral`]
//! adapters, plus scripted devices with hand-written GATT tables, without
//! touching real hardware. Events are pushed into the session sinks
//! synchronously from within the adapter calls, so once a session `flush`
//! resolves, every consequence within that session has been handled.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::AdvertiseSettings;
use crate::errors::{TransportError, TransportResult};
use crate::protocol::{
    chat_service, GattService, GattTable, CCCD_UUID, CHAT_SERVICE_UUID, ENABLE_NOTIFICATION_VALUE,
    MESSAGE_CHARACTERISTIC_UUID,
};
use crate::transport::{
    CentralTransport, GattStatus, LinkEvents, Observation, PeripheralTransport, ScanEvents,
    ServerEvent, ServerEvents,
};
use crate::types::{LinkId, PeerAddress, PeerHandle, RequestId, ServerId};

// ----------------------------------------------------------------------------
// Failure Injection
// ----------------------------------------------------------------------------

/// Faults the radio injects into adapter calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Adapter reports itself unavailable
    pub radio_off: bool,
    /// `open_server` fails
    pub fail_open: bool,
    /// `publish_service` fails
    pub fail_publish: bool,
    /// `start_advertising` reports no advertiser
    pub no_advertiser: bool,
    /// Advertising is accepted, then fails asynchronously with this code
    pub advertise_failure: Option<i32>,
    /// Discovery completes with a failure status
    pub fail_discovery: bool,
    /// Characteristic writes are refused by the local stack
    pub reject_writes: bool,
}

impl SimFaults {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn radio_off() -> Self {
        Self {
            radio_off: true,
            ..Self::default()
        }
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_publish_failure(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn with_no_advertiser(mut self) -> Self {
        self.no_advertiser = true;
        self
    }

    pub fn with_rejected_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub fn with_discovery_failure(mut self) -> Self {
        self.fail_discovery = true;
        self
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Traffic counters for the whole radio
#[derive(Debug, Default)]
pub struct SimStats {
    pub connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub writes: AtomicU64,
    pub notifications: AtomicU64,
    pub responses: AtomicU64,
}

impl SimStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn disconnections(&self) -> u64 {
        self.disconnections.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Scripted Devices
// ----------------------------------------------------------------------------

/// A remote device with a fixed GATT table and canned behaviour
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    pub address: PeerAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub table: GattTable,
    /// Service UUIDs placed in the advertisement
    pub advertised: Vec<Uuid>,
    /// Acknowledge CCCD writes with success
    pub accept_subscription: bool,
    /// Notify every written payload straight back
    pub echo: bool,
}

impl ScriptedDevice {
    /// A device serving the chat service
    pub fn chat(address: impl Into<PeerAddress>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            rssi: -60,
            table: GattTable::new(vec![chat_service()]),
            advertised: vec![CHAT_SERVICE_UUID],
            accept_subscription: true,
            echo: false,
        }
    }

    /// A device advertising the chat service but lacking its characteristic
    pub fn without_chat_characteristic(address: impl Into<PeerAddress>) -> Self {
        let mut service = chat_service();
        service.characteristics.clear();
        Self {
            table: GattTable::new(vec![service]),
            ..Self::chat(address, None)
        }
    }

    /// An unrelated device
    pub fn other(address: impl Into<PeerAddress>, name: Option<&str>) -> Self {
        Self {
            table: GattTable::default(),
            advertised: Vec::new(),
            ..Self::chat(address, name)
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn rejecting_subscription(mut self) -> Self {
        self.accept_subscription = false;
        self
    }
}

// ----------------------------------------------------------------------------
// Radio State
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum Behaviour {
    Scripted {
        device: ScriptedDevice,
        received: Vec<Vec<u8>>,
    },
    Hosted {
        server: ServerEvents,
        services: Vec<GattService>,
        value: Vec<u8>,
    },
}

#[derive(Debug)]
struct Device {
    name: Option<String>,
    rssi: i16,
    advertising: bool,
    advertised: Vec<Uuid>,
    behaviour: Behaviour,
}

impl Device {
    fn observation(&self, address: &PeerAddress) -> Observation {
        Observation {
            address: address.clone(),
            name: self.name.clone(),
            rssi: self.rssi,
            handle: PeerHandle::new(address.as_str()),
            services: self.advertised.clone(),
        }
    }

    fn table(&self) -> GattTable {
        match &self.behaviour {
            Behaviour::Scripted { device, .. } => device.table.clone(),
            Behaviour::Hosted { services, .. } => GattTable::new(services.clone()),
        }
    }
}

#[derive(Debug)]
struct SimLink {
    target: PeerAddress,
    events: LinkEvents,
    subscribed: bool,
}

#[derive(Debug, Default)]
struct CentralSlot {
    scan: Option<(Option<Uuid>, ScanEvents)>,
    links: HashMap<LinkId, SimLink>,
}

#[derive(Debug)]
struct PendingRequest {
    central: PeerAddress,
    link: LinkId,
    cccd: bool,
}

#[derive(Debug, Default)]
struct RadioState {
    faults: SimFaults,
    devices: BTreeMap<PeerAddress, Device>,
    centrals: HashMap<PeerAddress, CentralSlot>,
    pending: HashMap<(PeerAddress, u32), PendingRequest>,
    next_request: u32,
}

impl RadioState {
    fn broadcast(&self, address: &PeerAddress) {
        let Some(device) = self.devices.get(address) else {
            return;
        };
        if !device.advertising {
            return;
        }
        for slot in self.centrals.values() {
            if let Some((filter, scan)) = &slot.scan {
                if filter.map_or(true, |uuid| device.advertised.contains(&uuid)) {
                    scan.observe(device.observation(address));
                }
            }
        }
    }

    fn server_of(&self, address: &PeerAddress) -> Option<&ServerEvents> {
        match self.devices.get(address).map(|d| &d.behaviour) {
            Some(Behaviour::Hosted { server, .. }) => Some(server),
            _ => None,
        }
    }

    fn link(&self, central: &PeerAddress, link: LinkId) -> TransportResult<&SimLink> {
        self.centrals
            .get(central)
            .and_then(|slot| slot.links.get(&link))
            .ok_or(TransportError::UnknownLink { link: link.get() })
    }

    /// Drop every link to `address`, telling both ends
    fn sever_links_to(&mut self, address: &PeerAddress, stats: &SimStats) {
        for (central, slot) in self.centrals.iter_mut() {
            slot.links.retain(|id, link| {
                if &link.target != address {
                    return true;
                }
                debug!("Link {} from {} to {} lost", id, central, address);
                link.events.disconnected();
                stats.disconnections.fetch_add(1, Ordering::Relaxed);
                false
            });
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated Radio
// ----------------------------------------------------------------------------

/// Shared in-memory medium all simulated adapters attach to
#[derive(Debug, Clone, Default)]
pub struct SimRadio {
    state: Arc<Mutex<RadioState>>,
    stats: Arc<SimStats>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a central adapter identified by `address`
    pub fn central(&self, address: impl Into<PeerAddress>) -> SimCentral {
        let address = address.into();
        self.lock().centrals.entry(address.clone()).or_default();
        SimCentral {
            radio: self.clone(),
            address,
        }
    }

    /// Attach a peripheral adapter identified by `address`
    pub fn peripheral(&self, address: impl Into<PeerAddress>) -> SimPeripheral {
        SimPeripheral {
            radio: self.clone(),
            address: address.into(),
        }
    }

    /// Place a scripted device on the air; it advertises immediately
    pub fn add_device(&self, device: ScriptedDevice) {
        let address = device.address.clone();
        let mut state = self.lock();
        state.devices.insert(
            address.clone(),
            Device {
                name: device.name.clone(),
                rssi: device.rssi,
                advertising: true,
                advertised: device.advertised.clone(),
                behaviour: Behaviour::Scripted {
                    device,
                    received: Vec::new(),
                },
            },
        );
        state.broadcast(&address);
    }

    /// Report a device again with a new signal strength
    pub fn sight(&self, address: &PeerAddress, rssi: i16) {
        let mut state = self.lock();
        if let Some(device) = state.devices.get_mut(address) {
            device.rssi = rssi;
        }
        state.broadcast(address);
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.lock().faults = faults;
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }

    /// Payloads a scripted device has received
    pub fn received_by(&self, address: &PeerAddress) -> Vec<Vec<u8>> {
        match self.lock().devices.get(address).map(|d| &d.behaviour) {
            Some(Behaviour::Scripted { received, .. }) => received.clone(),
            _ => Vec::new(),
        }
    }

    /// Current value of a hosted server's chat characteristic
    pub fn value_of(&self, address: &PeerAddress) -> Option<Vec<u8>> {
        match self.lock().devices.get(address).map(|d| &d.behaviour) {
            Some(Behaviour::Hosted { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Push a notification from a scripted device to every subscribed link
    pub fn push_from(&self, address: &PeerAddress, value: &[u8]) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for slot in state.centrals.values() {
            for link in slot.links.values() {
                if &link.target == address && link.subscribed {
                    link.events
                        .notification(MESSAGE_CHARACTERISTIC_UUID, value.to_vec());
                    self.stats.notifications.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Simulate the radio link between a central and a peripheral dropping
    pub fn drop_link(&self, central: &PeerAddress, peripheral: &PeerAddress) {
        let mut state = self.lock();
        let Some(slot) = state.centrals.get_mut(central) else {
            return;
        };
        let dropped: Vec<LinkId> = slot
            .links
            .iter()
            .filter(|(_, link)| &link.target == peripheral)
            .map(|(id, _)| *id)
            .collect();
        for id in &dropped {
            if let Some(link) = slot.links.remove(id) {
                link.events.disconnected();
                self.stats.disconnections.fetch_add(1, Ordering::Relaxed);
            }
        }
        if !dropped.is_empty() {
            if let Some(server) = state.server_of(peripheral) {
                server.connection_state_changed(central.clone(), false);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Central Adapter
// ----------------------------------------------------------------------------

/// Central role adapter on a [`SimRadio`]
#[derive(Debug, Clone)]
pub struct SimCentral {
    radio: SimRadio,
    address: PeerAddress,
}

impl SimCentral {
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}

#[async_trait]
impl CentralTransport for SimCentral {
    fn is_available(&self) -> bool {
        !self.radio.lock().faults.radio_off
    }

    async fn start_scan(&self, filter: Option<Uuid>, events: ScanEvents) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.radio_off {
            return Err(TransportError::unavailable("radio is off"));
        }
        for (address, device) in &state.devices {
            if device.advertising && filter.map_or(true, |uuid| device.advertised.contains(&uuid))
            {
                events.observe(device.observation(address));
            }
        }
        state
            .centrals
            .entry(self.address.clone())
            .or_default()
            .scan = Some((filter, events));
        Ok(())
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        if let Some(slot) = self.radio.lock().centrals.get_mut(&self.address) {
            slot.scan = None;
        }
        Ok(())
    }

    async fn connect(&self, peer: &PeerHandle, events: LinkEvents) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.radio_off {
            return Err(TransportError::unavailable("radio is off"));
        }
        let target = PeerAddress::new(peer.as_str());
        if !state.devices.contains_key(&target) {
            return Err(TransportError::UnknownPeer { address: target });
        }

        events.connected();
        self.radio.stats.connections.fetch_add(1, Ordering::Relaxed);
        if let Some(server) = state.server_of(&target) {
            server.connection_state_changed(self.address.clone(), true);
        }
        let link = events.id();
        trace!("Sim link {} from {} to {}", link, self.address, target);
        state
            .centrals
            .entry(self.address.clone())
            .or_default()
            .links
            .insert(
                link,
                SimLink {
                    target,
                    events,
                    subscribed: false,
                },
            );
        Ok(())
    }

    async fn discover_services(&self, link: LinkId) -> TransportResult<()> {
        let state = self.radio.lock();
        let sim_link = state.link(&self.address, link)?;
        if state.faults.fail_discovery {
            sim_link
                .events
                .services_discovered(Err("GATT status 129".to_string()));
            return Ok(());
        }
        let table = state
            .devices
            .get(&sim_link.target)
            .map(Device::table)
            .unwrap_or_default();
        sim_link.events.services_discovered(Ok(table));
        Ok(())
    }

    async fn enable_notifications(
        &self,
        link: LinkId,
        characteristic: Uuid,
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        let target = state.link(&self.address, link)?.target.clone();
        let Some(device) = state.devices.get(&target) else {
            return Err(TransportError::UnknownPeer { address: target });
        };
        let has_cccd = device.table().services.iter().any(|service| {
            service
                .characteristic(characteristic)
                .is_some_and(|c| c.has_descriptor(CCCD_UUID))
        });
        if !has_cccd {
            return Err(TransportError::rejected(
                "enable notifications",
                "characteristic has no CCCD",
            ));
        }

        let scripted_answer = match &device.behaviour {
            Behaviour::Scripted { device, .. } => Some(device.accept_subscription),
            Behaviour::Hosted { .. } => None,
        };

        let request = state.next_request;
        state.next_request += 1;
        if let Some(slot) = state.centrals.get_mut(&self.address) {
            if let Some(sim_link) = slot.links.get_mut(&link) {
                sim_link.subscribed = true;
                if let Some(ok) = scripted_answer {
                    sim_link.events.descriptor_written(ok);
                }
            }
        }

        if scripted_answer.is_none() {
            state.pending.insert(
                (target.clone(), request),
                PendingRequest {
                    central: self.address.clone(),
                    link,
                    cccd: true,
                },
            );
            if let Some(server) = state.server_of(&target) {
                server.emit(ServerEvent::DescriptorWriteRequest {
                    device: self.address.clone(),
                    request: RequestId(request),
                    characteristic,
                    descriptor: CCCD_UUID,
                    value: ENABLE_NOTIFICATION_VALUE.to_vec(),
                    response_needed: true,
                });
            }
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.reject_writes {
            return Err(TransportError::rejected("write", "stack busy"));
        }
        let target = state.link(&self.address, link)?.target.clone();
        self.radio.stats.writes.fetch_add(1, Ordering::Relaxed);

        let request = state.next_request;
        state.next_request += 1;
        let mut echo = None;
        let mut awaiting_response = false;
        match state.devices.get_mut(&target).map(|d| &mut d.behaviour) {
            Some(Behaviour::Scripted { device, received }) => {
                received.push(value.to_vec());
                if device.echo {
                    echo = Some(value.to_vec());
                }
            }
            Some(Behaviour::Hosted { server, .. }) => {
                server.emit(ServerEvent::CharacteristicWriteRequest {
                    device: self.address.clone(),
                    request: RequestId(request),
                    characteristic,
                    value: value.to_vec(),
                    response_needed: true,
                });
                awaiting_response = true;
            }
            None => return Err(TransportError::UnknownPeer { address: target }),
        }
        if awaiting_response {
            state.pending.insert(
                (target, request),
                PendingRequest {
                    central: self.address.clone(),
                    link,
                    cccd: false,
                },
            );
        }

        if let Some(value) = echo {
            let sim_link = state.link(&self.address, link)?;
            if sim_link.subscribed {
                sim_link.events.notification(characteristic, value);
                self.radio.stats.notifications.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn disconnect(&self, link: LinkId) -> TransportResult<()> {
        let mut state = self.radio.lock();
        let removed = state
            .centrals
            .get_mut(&self.address)
            .and_then(|slot| slot.links.remove(&link));
        let Some(removed) = removed else {
            return Err(TransportError::UnknownLink { link: link.get() });
        };
        self.radio
            .stats
            .disconnections
            .fetch_add(1, Ordering::Relaxed);
        if let Some(server) = state.server_of(&removed.target) {
            server.connection_state_changed(self.address.clone(), false);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Peripheral Adapter
// ----------------------------------------------------------------------------

/// Peripheral role adapter on a [`SimRadio`]
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    radio: SimRadio,
    address: PeerAddress,
}

impl SimPeripheral {
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// The device entry, if it belongs to the server instance `server`
    fn hosted<'a>(
        &self,
        state: &'a mut RadioState,
        server: ServerId,
    ) -> TransportResult<&'a mut Device> {
        let closed = || TransportError::Failed(format!("server {} is closed", server));
        let device = state.devices.get_mut(&self.address).ok_or_else(closed)?;
        let current = matches!(
            &device.behaviour,
            Behaviour::Hosted { server: events, .. } if events.id() == server
        );
        if !current {
            return Err(closed());
        }
        Ok(device)
    }
}

#[async_trait]
impl PeripheralTransport for SimPeripheral {
    fn is_available(&self) -> bool {
        !self.radio.lock().faults.radio_off
    }

    async fn open_server(&self, events: ServerEvents) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.radio_off {
            return Err(TransportError::unavailable("radio is off"));
        }
        if state.faults.fail_open {
            return Err(TransportError::rejected("open server", "stack refused"));
        }
        state.sever_links_to(&self.address, &self.radio.stats);
        state.devices.insert(
            self.address.clone(),
            Device {
                name: None,
                rssi: -55,
                advertising: false,
                advertised: Vec::new(),
                behaviour: Behaviour::Hosted {
                    server: events,
                    services: Vec::new(),
                    value: Vec::new(),
                },
            },
        );
        Ok(())
    }

    async fn publish_service(
        &self,
        server: ServerId,
        service: &GattService,
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.fail_publish {
            return Err(TransportError::rejected("addService", "stack refused"));
        }
        let device = self.hosted(&mut state, server)?;
        if let Behaviour::Hosted { services, .. } = &mut device.behaviour {
            services.push(service.clone());
        }
        Ok(())
    }

    async fn start_advertising(
        &self,
        server: ServerId,
        settings: &AdvertiseSettings,
        local_name: &str,
        service: Uuid,
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        if state.faults.no_advertiser {
            return Err(TransportError::unavailable("no advertiser"));
        }
        let failure = state.faults.advertise_failure;
        let device = self.hosted(&mut state, server)?;
        if let Behaviour::Hosted { server: events, .. } = &device.behaviour {
            if let Some(code) = failure {
                events.emit(ServerEvent::AdvertisingFailed { code });
                return Ok(());
            }
            events.emit(ServerEvent::AdvertisingStarted);
        }
        device.advertising = true;
        device.advertised = vec![service];
        device.name = settings.include_name.then(|| local_name.to_string());
        state.broadcast(&self.address);
        Ok(())
    }

    async fn stop_advertising(&self, server: ServerId) -> TransportResult<()> {
        let mut state = self.radio.lock();
        let device = self.hosted(&mut state, server)?;
        if !device.advertising {
            return Err(TransportError::Failed("not advertising".to_string()));
        }
        device.advertising = false;
        Ok(())
    }

    async fn set_value(
        &self,
        server: ServerId,
        _characteristic: Uuid,
        new_value: &[u8],
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        let device = self.hosted(&mut state, server)?;
        if let Behaviour::Hosted { value, .. } = &mut device.behaviour {
            *value = new_value.to_vec();
        }
        Ok(())
    }

    async fn notify(
        &self,
        server: ServerId,
        device: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        self.hosted(&mut state, server)?;
        let link = state.centrals.get(device).and_then(|slot| {
            slot.links
                .values()
                .find(|link| link.target == self.address && link.subscribed)
        });
        let Some(link) = link else {
            return Err(TransportError::UnknownPeer {
                address: device.clone(),
            });
        };
        link.events.notification(characteristic, value.to_vec());
        self.radio.stats.notifications.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn respond(
        &self,
        server: ServerId,
        device: &PeerAddress,
        request: RequestId,
        status: GattStatus,
    ) -> TransportResult<()> {
        let mut state = self.radio.lock();
        self.hosted(&mut state, server)?;
        self.radio.stats.responses.fetch_add(1, Ordering::Relaxed);
        let Some(pending) = state.pending.remove(&(self.address.clone(), request.0)) else {
            return Err(TransportError::Failed(format!(
                "no pending request {} from {}",
                request.0, device
            )));
        };
        if pending.cccd {
            if let Ok(link) = state.link(&pending.central, pending.link) {
                link.events.descriptor_written(status == GattStatus::Success);
            }
        }
        Ok(())
    }

    async fn close_server(&self, server: ServerId) -> TransportResult<()> {
        let mut state = self.radio.lock();
        self.hosted(&mut state, server)?;
        state.devices.remove(&self.address);
        state.pending.retain(|(address, _), _| address != &self.address);
        state.sever_links_to(&self.address, &self.radio.stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::{CentralSession, CentralState};
    use crate::config::EngineConfig;
    use crate::peripheral::{PeripheralSession, PeripheralState};

    #[tokio::test]
    async fn test_scripted_echo_device() {
        let radio = SimRadio::new();
        radio.add_device(ScriptedDevice::chat("AA:BB", Some("echo")).with_echo());
        let central =
            CentralSession::spawn(Arc::new(radio.central("C0")), EngineConfig::default());

        central.start_scan().unwrap();
        central.flush().await.unwrap();
        let peer = central.peers().into_iter().next().unwrap();
        assert_eq!(peer.display_name(), "echo");

        central.connect(peer).unwrap();
        central.flush().await.unwrap();
        assert_eq!(central.state(), CentralState::Ready);

        central.send("ping").unwrap();
        central.flush().await.unwrap();
        let chats: Vec<_> = central
            .messages()
            .into_iter()
            .filter(|m| m.is_chat())
            .map(|m| (m.text.clone(), m.from_self()))
            .collect();
        assert_eq!(
            chats,
            vec![("ping".to_string(), true), ("ping".to_string(), false)]
        );
        assert_eq!(radio.received_by(&"AA:BB".into()), vec![b"ping".to_vec()]);
    }

    #[tokio::test]
    async fn test_closing_server_drops_links() {
        let radio = SimRadio::new();
        let server =
            PeripheralSession::spawn(Arc::new(radio.peripheral("P0")), EngineConfig::default());
        server.start().unwrap();
        server.flush().await.unwrap();
        assert_eq!(server.state(), PeripheralState::Advertising);

        let central =
            CentralSession::spawn(Arc::new(radio.central("C0")), EngineConfig::default());
        central.connect_address("P0").unwrap();
        central.start_scan().unwrap();
        central.flush().await.unwrap();
        // Not scanned yet when the first connect was queued
        assert!(central.messages().last().unwrap().is_error());

        central.connect_address("P0").unwrap();
        central.flush().await.unwrap();
        server.flush().await.unwrap();
        central.flush().await.unwrap();
        assert_eq!(central.state(), CentralState::Ready);

        server.stop().unwrap();
        server.flush().await.unwrap();
        central.flush().await.unwrap();
        assert_eq!(central.state(), CentralState::Closed);
        assert_eq!(radio.stats().disconnections(), 1);
    }
}
