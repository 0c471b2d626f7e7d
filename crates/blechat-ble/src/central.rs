//! Central role on top of btleplug
//!
//! Every request returns as soon as btleplug accepted it. Work that needs a
//! round trip (connecting, discovery, the subscription write) runs in a spawned
//! task that reports its outcome through the link's event sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use blechat_core::protocol::{
    CharacteristicProperties, GattCharacteristic, GattService, GattTable,
};
use blechat_core::{
    CentralTransport, LinkEvents, LinkId, Observation, PeerAddress, PeerHandle, ScanEvents,
    TransportError, TransportResult,
};
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BleError;

/// RSSI reported for cached devices the adapter has not heard from yet
const UNKNOWN_RSSI: i16 = -127;

// ----------------------------------------------------------------------------
// Link Bookkeeping
// ----------------------------------------------------------------------------

struct Link {
    /// Key of the peripheral in the device cache
    handle: String,
    peripheral: Peripheral,
    events: LinkEvents,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Central Adapter
// ----------------------------------------------------------------------------

/// [`CentralTransport`] backed by the first adapter btleplug reports
pub struct BtleplugCentral {
    adapter: Adapter,
    /// Devices seen while scanning, keyed by the handle token we minted
    devices: Arc<Mutex<HashMap<String, Peripheral>>>,
    links: Mutex<HashMap<LinkId, Link>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    /// Last power state the adapter reported
    powered: Arc<AtomicBool>,
    power_task: JoinHandle<()>,
}

impl BtleplugCentral {
    pub async fn new() -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::AdapterNotAvailable)?;

        let state = adapter.adapter_state().await?;
        let powered = Arc::new(AtomicBool::new(is_powered(&state)));
        let mut adapter_events = adapter.events().await?;
        let power_task = {
            let powered = powered.clone();
            tokio::spawn(async move {
                while let Some(event) = adapter_events.next().await {
                    if let CentralEvent::StateUpdate(state) = event {
                        info!("Adapter state changed to {:?}", state);
                        powered.store(is_powered(&state), Ordering::Relaxed);
                    }
                }
            })
        };

        info!("BLE central adapter initialized ({:?})", state);
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            links: Mutex::new(HashMap::new()),
            scan_task: Mutex::new(None),
            powered,
            power_task,
        })
    }

    async fn link_parts(&self, link: LinkId) -> TransportResult<(Peripheral, LinkEvents)> {
        self.links
            .lock()
            .await
            .get(&link)
            .map(|l| (l.peripheral.clone(), l.events.clone()))
            .ok_or(TransportError::UnknownLink { link: link.get() })
    }

    async fn track(&self, link: LinkId, task: JoinHandle<()>) {
        match self.links.lock().await.get_mut(&link) {
            Some(entry) => entry.tasks.push(task),
            None => task.abort(),
        }
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        self.power_task.abort();
    }
}

#[async_trait]
impl CentralTransport for BtleplugCentral {
    fn is_available(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
    }

    async fn start_scan(&self, filter: Option<Uuid>, events: ScanEvents) -> TransportResult<()> {
        let mut stream = self.adapter.events().await.map_err(BleError::from)?;
        self.adapter
            .start_scan(ScanFilter {
                services: filter.into_iter().collect(),
            })
            .await
            .map_err(BleError::from)?;

        // Forget devices from earlier scans unless a link still uses them
        let live: HashSet<String> = self
            .links
            .lock()
            .await
            .values()
            .map(|l| l.handle.clone())
            .collect();
        retain_live(&mut self.devices.lock().await, &live);

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if events.is_closed() {
                    break;
                }
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Some((peripheral, observation)) = observe(&adapter, &id).await else {
                    continue;
                };
                devices
                    .lock()
                    .await
                    .insert(observation.handle.as_str().to_string(), peripheral);
                if !events.observe(observation) {
                    break;
                }
            }
            debug!("Scan {} event stream ended", events.id());
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        info!("Started BLE scan");
        Ok(())
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        self.adapter.stop_scan().await.map_err(BleError::from)?;
        Ok(())
    }

    async fn connect(&self, peer: &PeerHandle, events: LinkEvents) -> TransportResult<()> {
        let peripheral = self
            .devices
            .lock()
            .await
            .get(peer.as_str())
            .cloned()
            .ok_or_else(|| BleError::UnknownDevice(peer.as_str().to_string()))?;
        let id = peripheral.id();
        let mut adapter_events = self.adapter.events().await.map_err(BleError::from)?;

        let watcher = {
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(event) = adapter_events.next().await {
                    if events.is_closed() {
                        break;
                    }
                    if matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id) {
                        events.disconnected();
                        break;
                    }
                }
            })
        };

        let connector = {
            let events = events.clone();
            let peripheral = peripheral.clone();
            tokio::spawn(async move {
                match peripheral.connect().await {
                    Ok(()) => {
                        events.connected();
                    }
                    Err(e) => {
                        warn!("Link {} failed to connect: {}", events.id(), e);
                        events.disconnected();
                    }
                }
            })
        };

        let link = events.id();
        self.links.lock().await.insert(
            link,
            Link {
                handle: peer.as_str().to_string(),
                peripheral,
                events,
                tasks: vec![watcher, connector],
            },
        );
        Ok(())
    }

    async fn discover_services(&self, link: LinkId) -> TransportResult<()> {
        let (peripheral, events) = self.link_parts(link).await?;
        let task = tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(gatt_table(&peripheral)),
                Err(e) => Err(e.to_string()),
            };
            events.services_discovered(result);
        });
        self.track(link, task).await;
        Ok(())
    }

    async fn enable_notifications(
        &self,
        link: LinkId,
        characteristic: Uuid,
    ) -> TransportResult<()> {
        let (peripheral, events) = self.link_parts(link).await?;
        let target = find_characteristic(&peripheral, characteristic)?;

        let task = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Link {} has no notification stream: {}", events.id(), e);
                    events.descriptor_written(false);
                    return;
                }
            };
            let subscribed = match peripheral.subscribe(&target).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Link {} subscription failed: {}", events.id(), e);
                    false
                }
            };
            events.descriptor_written(subscribed);
            if !subscribed {
                return;
            }
            while let Some(notification) = notifications.next().await {
                if !events.notification(notification.uuid, notification.value) {
                    break;
                }
            }
            debug!("Notification stream for link {} ended", events.id());
        });
        self.track(link, task).await;
        Ok(())
    }

    async fn write_characteristic(
        &self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        let (peripheral, _) = self.link_parts(link).await?;
        let target = find_characteristic(&peripheral, characteristic)?;
        // Without-response writes only wait for the local queue
        let write_type = if target
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        peripheral
            .write(&target, value, write_type)
            .await
            .map_err(BleError::from)?;
        debug!("Wrote {} bytes on link {}", value.len(), link);
        Ok(())
    }

    async fn disconnect(&self, link: LinkId) -> TransportResult<()> {
        let Some(entry) = self.links.lock().await.remove(&link) else {
            return Ok(());
        };
        entry.abort();
        let peripheral = entry.peripheral;
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect of link {} failed: {}", link, e);
            }
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

fn is_powered(state: &CentralState) -> bool {
    !matches!(state, CentralState::PoweredOff)
}

/// Drop cached devices whose handle is not in `live`
fn retain_live<T>(devices: &mut HashMap<String, T>, live: &HashSet<String>) {
    devices.retain(|handle, _| live.contains(handle));
}

fn handle_of(id: &PeripheralId) -> String {
    format!("{:?}", id)
}

async fn observe(adapter: &Adapter, id: &PeripheralId) -> Option<(Peripheral, Observation)> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let observation = Observation {
        address: PeerAddress::new(properties.address.to_string()),
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
        handle: PeerHandle::new(handle_of(id)),
        services: properties.services,
    };
    Some((peripheral, observation))
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, BleError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(BleError::CharacteristicNotFound(uuid))
}

fn properties_of(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn gatt_table(peripheral: &Peripheral) -> GattTable {
    let services = peripheral
        .services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            primary: service.primary,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|c| GattCharacteristic {
                    uuid: c.uuid,
                    properties: properties_of(c.properties),
                    descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect();
    GattTable::new(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_flags_translate() {
        let props = properties_of(CharPropFlags::WRITE | CharPropFlags::NOTIFY);
        assert!(props.write);
        assert!(props.notify);
        assert!(!props.read);
        assert!(!props.write_without_response);
        assert!(!props.indicate);
    }

    #[test]
    fn test_only_powered_off_is_unavailable() {
        assert!(is_powered(&CentralState::PoweredOn));
        assert!(is_powered(&CentralState::Unknown));
        assert!(!is_powered(&CentralState::PoweredOff));
    }

    #[test]
    fn test_device_cache_keeps_linked_handles() {
        let mut devices: HashMap<String, u8> = [("a", 1), ("b", 2), ("c", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let live: HashSet<String> = ["b".to_string()].into_iter().collect();

        retain_live(&mut devices, &live);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.get("b"), Some(&2));

        retain_live(&mut devices, &HashSet::new());
        assert!(devices.is_empty());
    }
}
