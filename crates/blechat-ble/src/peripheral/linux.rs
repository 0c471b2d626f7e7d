//! BlueZ peripheral using the bluer crate
//!
//! BlueZ owns the CCCD of every characteristic it serves and only tells the
//! application when the first subscriber arrives and when the last one leaves.
//! That notify session is presented to the engine as a single subscribed
//! device, [`NOTIFY_SESSION`]. Writes carry the real device address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use blechat_core::protocol::{
    GattCharacteristic, GattService, CCCD_UUID, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};
use blechat_core::{
    AdvertiseSettings, GattStatus, PeerAddress, PeripheralTransport, RequestId, ServerEvent,
    ServerEvents, ServerId, TransportError, TransportResult,
};
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
    CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, ReqResult, Service,
};
use bluer::{AdapterEvent, AdapterProperty};
use futures::{FutureExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BleError;

/// Pseudo device standing for everyone subscribed through BlueZ
pub const NOTIFY_SESSION: &str = "bluez:notify-session";

type Values = Arc<Mutex<HashMap<Uuid, Vec<u8>>>>;
type Notifiers = Arc<Mutex<HashMap<Uuid, CharacteristicNotifier>>>;

// ----------------------------------------------------------------------------
// Server State
// ----------------------------------------------------------------------------

struct Server {
    events: ServerEvents,
    values: Values,
    notifiers: Notifiers,
    /// Dropping the handle unregisters the application
    application: Option<ApplicationHandle>,
    /// Dropping the handle stops advertising
    advertisement: Option<AdvertisementHandle>,
}

impl Server {
    fn new(events: ServerEvents) -> Self {
        Self {
            events,
            values: Arc::new(Mutex::new(HashMap::new())),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
            application: None,
            advertisement: None,
        }
    }
}

fn server_mut(slot: &mut Option<Server>, id: ServerId) -> Result<&mut Server, BleError> {
    slot.as_mut()
        .filter(|server| server.events.id() == id)
        .ok_or(BleError::ServerNotOpen)
}

// ----------------------------------------------------------------------------
// BlueZ Adapter
// ----------------------------------------------------------------------------

/// [`PeripheralTransport`] backed by the default BlueZ adapter
pub struct BluezPeripheral {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    server: Mutex<Option<Server>>,
    /// Last `Powered` value BlueZ reported for the adapter
    powered: Arc<AtomicBool>,
    power_task: JoinHandle<()>,
}

impl BluezPeripheral {
    pub async fn new() -> Result<Self, BleError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        if !adapter.is_powered().await? {
            if let Err(e) = adapter.set_powered(true).await {
                warn!("Could not power on {}: {}", adapter.name(), e);
            }
        }

        let powered = Arc::new(AtomicBool::new(adapter.is_powered().await?));
        let adapter_events = adapter.events().await?;
        let power_task = {
            let powered = powered.clone();
            tokio::spawn(async move {
                futures::pin_mut!(adapter_events);
                while let Some(event) = adapter_events.next().await {
                    if let Some(on) = power_change(&event) {
                        info!("Adapter powered: {}", on);
                        powered.store(on, Ordering::Relaxed);
                    }
                }
            })
        };

        info!("BlueZ peripheral ready on {}", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
            server: Mutex::new(None),
            powered,
            power_task,
        })
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        self.power_task.abort();
    }
}

fn power_change(event: &AdapterEvent) -> Option<bool> {
    match event {
        AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) => Some(*on),
        _ => None,
    }
}

#[async_trait]
impl PeripheralTransport for BluezPeripheral {
    fn is_available(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
    }

    async fn open_server(&self, events: ServerEvents) -> TransportResult<()> {
        debug!("Opening BlueZ server {}", events.id());
        *self.server.lock().await = Some(Server::new(events));
        Ok(())
    }

    async fn publish_service(
        &self,
        server: ServerId,
        service: &GattService,
    ) -> TransportResult<()> {
        let mut slot = self.server.lock().await;
        let server = server_mut(&mut slot, server)?;

        let characteristics = service
            .characteristics
            .iter()
            .map(|c| local_characteristic(c, server))
            .collect();
        let application = Application {
            services: vec![Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics,
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self
            .adapter
            .serve_gatt_application(application)
            .await
            .map_err(BleError::from)?;
        server.application = Some(handle);
        info!("Published service {}", service.uuid);
        Ok(())
    }

    async fn start_advertising(
        &self,
        server: ServerId,
        settings: &AdvertiseSettings,
        local_name: &str,
        service: Uuid,
    ) -> TransportResult<()> {
        let mut slot = self.server.lock().await;
        let server = server_mut(&mut slot, server)?;

        let advertisement = Advertisement {
            advertisement_type: if settings.connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids: [service].into_iter().collect(),
            local_name: settings.include_name.then(|| local_name.to_string()),
            discoverable: Some(true),
            tx_power: Some(settings.tx_power.dbm()),
            ..Default::default()
        };

        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(BleError::from)?;
        server.advertisement = Some(handle);
        server.events.emit(ServerEvent::AdvertisingStarted);
        Ok(())
    }

    async fn stop_advertising(&self, server: ServerId) -> TransportResult<()> {
        let mut slot = self.server.lock().await;
        server_mut(&mut slot, server)?.advertisement = None;
        Ok(())
    }

    async fn set_value(
        &self,
        server: ServerId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        let mut slot = self.server.lock().await;
        let server = server_mut(&mut slot, server)?;
        server
            .values
            .lock()
            .await
            .insert(characteristic, value.to_vec());
        Ok(())
    }

    async fn notify(
        &self,
        server: ServerId,
        device: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        if device.as_str() != NOTIFY_SESSION {
            return Err(TransportError::UnknownPeer {
                address: device.clone(),
            });
        }
        let mut slot = self.server.lock().await;
        let server = server_mut(&mut slot, server)?;

        let mut notifiers = server.notifiers.lock().await;
        let Some(notifier) = notifiers.get_mut(&characteristic) else {
            return Err(TransportError::rejected("notify", "no notify session"));
        };
        if notifier.is_stopped() {
            notifiers.remove(&characteristic);
            server
                .events
                .emit(subscription(characteristic, &DISABLE_NOTIFICATION_VALUE));
            return Err(TransportError::rejected("notify", "notify session ended"));
        }
        notifier
            .notify(value.to_vec())
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn respond(
        &self,
        _server: ServerId,
        device: &PeerAddress,
        request: RequestId,
        status: GattStatus,
    ) -> TransportResult<()> {
        // BlueZ already answered when the write handler returned
        debug!("Response {:?} to {} for {:?} handled by BlueZ", status, device, request);
        Ok(())
    }

    async fn close_server(&self, server: ServerId) -> TransportResult<()> {
        let mut slot = self.server.lock().await;
        if slot.as_ref().is_some_and(|s| s.events.id() == server) {
            *slot = None;
            debug!("Closed BlueZ server {}", server);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Application Building
// ----------------------------------------------------------------------------

fn subscription(characteristic: Uuid, value: &[u8]) -> ServerEvent {
    ServerEvent::DescriptorWriteRequest {
        device: PeerAddress::new(NOTIFY_SESSION),
        request: RequestId(0),
        characteristic,
        descriptor: CCCD_UUID,
        value: value.to_vec(),
        response_needed: false,
    }
}

fn local_characteristic(declared: &GattCharacteristic, server: &Server) -> Characteristic {
    let uuid = declared.uuid;
    let props = declared.properties;

    let read = props.read.then(|| {
        let values = server.values.clone();
        CharacteristicRead {
            read: true,
            fun: Box::new(move |_request: CharacteristicReadRequest| {
                let values = values.clone();
                async move {
                    let value = values.lock().await.get(&uuid).cloned().unwrap_or_default();
                    Ok::<Vec<u8>, ReqError>(value)
                }
                .boxed()
            }),
            ..Default::default()
        }
    });

    let write = (props.write || props.write_without_response).then(|| {
        let events = server.events.clone();
        let requests = Arc::new(AtomicU32::new(1));
        CharacteristicWrite {
            write: props.write,
            write_without_response: props.write_without_response,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |value: Vec<u8>, request: CharacteristicWriteRequest| {
                    if events.is_closed() {
                        return async move { ReqResult::<()>::Err(ReqError::Failed) }.boxed();
                    }
                    events.emit(ServerEvent::CharacteristicWriteRequest {
                        device: PeerAddress::new(request.device_address.to_string()),
                        request: RequestId(requests.fetch_add(1, Ordering::Relaxed)),
                        characteristic: uuid,
                        value,
                        response_needed: false,
                    });
                    async move { ReqResult::<()>::Ok(()) }.boxed()
                },
            )),
            ..Default::default()
        }
    });

    let notify = (props.notify || props.indicate).then(|| {
        let events = server.events.clone();
        let notifiers = server.notifiers.clone();
        CharacteristicNotify {
            notify: props.notify,
            indicate: props.indicate,
            method: CharacteristicNotifyMethod::Fun(Box::new(
                move |notifier: CharacteristicNotifier| {
                    let events = events.clone();
                    let notifiers = notifiers.clone();
                    async move {
                        debug!("BlueZ notify session started for {}", uuid);
                        notifiers.lock().await.insert(uuid, notifier);
                        events.emit(subscription(uuid, &ENABLE_NOTIFICATION_VALUE));
                    }
                    .boxed()
                },
            )),
            ..Default::default()
        }
    });

    Characteristic {
        uuid,
        read,
        write,
        notify,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_change_reads_powered_property() {
        let off = AdapterEvent::PropertyChanged(AdapterProperty::Powered(false));
        let on = AdapterEvent::PropertyChanged(AdapterProperty::Powered(true));
        let other = AdapterEvent::PropertyChanged(AdapterProperty::Discoverable(true));
        assert_eq!(power_change(&off), Some(false));
        assert_eq!(power_change(&on), Some(true));
        assert_eq!(power_change(&other), None);
    }
}
