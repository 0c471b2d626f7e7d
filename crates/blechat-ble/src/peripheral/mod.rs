//! Peripheral role and platform detection
//!
//! BlueZ (through bluer) is the only stack with a usable GATT server API from
//! Rust. Other targets, and Linux builds without the `peripheral` feature, get
//! [`fallback::UnsupportedPeripheral`].

pub mod fallback;
#[cfg(all(feature = "peripheral", target_os = "linux"))]
pub mod linux;

use async_trait::async_trait;
use blechat_core::protocol::GattService;
use blechat_core::{
    AdvertiseSettings, GattStatus, PeerAddress, PeripheralTransport, RequestId, ServerEvents,
    ServerId, TransportResult,
};
#[cfg(all(feature = "peripheral", target_os = "linux"))]
use tracing::warn;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific peripheral adapter
pub enum PlatformPeripheral {
    #[cfg(all(feature = "peripheral", target_os = "linux"))]
    Linux(linux::BluezPeripheral),
    Fallback(fallback::UnsupportedPeripheral),
}

impl PlatformPeripheral {
    /// Connect to the platform stack, falling back when it cannot be reached
    pub async fn new() -> Self {
        #[cfg(all(feature = "peripheral", target_os = "linux"))]
        {
            match linux::BluezPeripheral::new().await {
                Ok(peripheral) => return Self::Linux(peripheral),
                Err(e) => warn!("BlueZ peripheral unavailable: {}", e),
            }
        }
        Self::Fallback(fallback::UnsupportedPeripheral::new())
    }
}

#[async_trait]
impl PeripheralTransport for PlatformPeripheral {
    fn is_available(&self) -> bool {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.is_available(),
            Self::Fallback(ref inner) => inner.is_available(),
        }
    }

    async fn open_server(&self, events: ServerEvents) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.open_server(events).await,
            Self::Fallback(ref inner) => inner.open_server(events).await,
        }
    }

    async fn publish_service(
        &self,
        server: ServerId,
        service: &GattService,
    ) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.publish_service(server, service).await,
            Self::Fallback(ref inner) => inner.publish_service(server, service).await,
        }
    }

    async fn start_advertising(
        &self,
        server: ServerId,
        settings: &AdvertiseSettings,
        local_name: &str,
        service: Uuid,
    ) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => {
                inner
                    .start_advertising(server, settings, local_name, service)
                    .await
            }
            Self::Fallback(ref inner) => {
                inner
                    .start_advertising(server, settings, local_name, service)
                    .await
            }
        }
    }

    async fn stop_advertising(&self, server: ServerId) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.stop_advertising(server).await,
            Self::Fallback(ref inner) => inner.stop_advertising(server).await,
        }
    }

    async fn set_value(
        &self,
        server: ServerId,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.set_value(server, characteristic, value).await,
            Self::Fallback(ref inner) => inner.set_value(server, characteristic, value).await,
        }
    }

    async fn notify(
        &self,
        server: ServerId,
        device: &PeerAddress,
        characteristic: Uuid,
        value: &[u8],
    ) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.notify(server, device, characteristic, value).await,
            Self::Fallback(ref inner) => {
                inner.notify(server, device, characteristic, value).await
            }
        }
    }

    async fn respond(
        &self,
        server: ServerId,
        device: &PeerAddress,
        request: RequestId,
        status: GattStatus,
    ) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.respond(server, device, request, status).await,
            Self::Fallback(ref inner) => inner.respond(server, device, request, status).await,
        }
    }

    async fn close_server(&self, server: ServerId) -> TransportResult<()> {
        match self {
            #[cfg(all(feature = "peripheral", target_os = "linux"))]
            Self::Linux(ref inner) => inner.close_server(server).await,
            Self::Fallback(ref inner) => inner.close_server(server).await,
        }
    }
}
