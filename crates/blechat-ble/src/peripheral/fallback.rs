//! Fallback peripheral for platforms without a supported GATT server

use async_trait::async_trait;
use blechat_core::protocol::GattService;
use blechat_core::{
    AdvertiseSettings, GattStatus, PeerAddress, PeripheralTransport, RequestId, ServerEvents,
    ServerId, TransportError, TransportResult,
};
use uuid::Uuid;

const REASON: &str = "BLE peripheral mode is not supported on this platform";

/// Reports the radio as unavailable and refuses every request
#[derive(Debug, Default)]
pub struct UnsupportedPeripheral;

impl UnsupportedPeripheral {
    pub fn new() -> Self {
        Self
    }
}

fn unsupported() -> TransportResult<()> {
    Err(TransportError::unavailable(REASON))
}

#[async_trait]
impl PeripheralTransport for UnsupportedPeripheral {
    fn is_available(&self) -> bool {
        false
    }

    async fn open_server(&self, _events: ServerEvents) -> TransportResult<()> {
        unsupported()
    }

    async fn publish_service(
        &self,
        _server: ServerId,
        _service: &GattService,
    ) -> TransportResult<()> {
        unsupported()
    }

    async fn start_advertising(
        &self,
        _server: ServerId,
        _settings: &AdvertiseSettings,
        _local_name: &str,
        _service: Uuid,
    ) -> TransportResult<()> {
        unsupported()
    }

    async fn stop_advertising(&self, _server: ServerId) -> TransportResult<()> {
        Ok(())
    }

    async fn set_value(
        &self,
        _server: ServerId,
        _characteristic: Uuid,
        _value: &[u8],
    ) -> TransportResult<()> {
        unsupported()
    }

    async fn notify(
        &self,
        _server: ServerId,
        _device: &PeerAddress,
        _characteristic: Uuid,
        _value: &[u8],
    ) -> TransportResult<()> {
        unsupported()
    }

    async fn respond(
        &self,
        _server: ServerId,
        _device: &PeerAddress,
        _request: RequestId,
        _status: GattStatus,
    ) -> TransportResult<()> {
        unsupported()
    }

    async fn close_server(&self, _server: ServerId) -> TransportResult<()> {
        Ok(())
    }
}
