//! GATT protocol constants and layout for the chat service
//!
//! Both roles must agree on these identifiers bit for bit. Payloads are raw
//! UTF-8 with no framing: one write or notification carries one message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service, Characteristic and Descriptor UUIDs
// ----------------------------------------------------------------------------

/// Chat service UUID
pub const CHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ABCD_0000_1000_8000_00805F9B34FB);

/// Characteristic carrying chat payloads in both directions
pub const MESSAGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000DCBA_0000_1000_8000_00805F9B34FB);

/// Client Characteristic Configuration Descriptor (0x2902)
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCCD value disabling both
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Largest attribute value ATT allows
pub const MAX_ATTRIBUTE_LEN: usize = 512;

// ----------------------------------------------------------------------------
// GATT Table
// ----------------------------------------------------------------------------

/// Properties advertised by a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Writable and notifiable, as the chat characteristic is published
    pub const fn chat() -> Self {
        Self {
            read: false,
            write: true,
            write_without_response: true,
            notify: true,
            indicate: false,
        }
    }
}

/// One characteristic in a discovered or published service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// One service in a discovered or published table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Queryable service tree produced by service discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattTable {
    pub services: Vec<GattService>,
}

impl GattTable {
    pub fn new(services: Vec<GattService>) -> Self {
        Self { services }
    }

    pub fn service(&self, uuid: Uuid) -> Option<&GattService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }
}

/// The chat service as the peripheral publishes it
pub fn chat_service() -> GattService {
    GattService {
        uuid: CHAT_SERVICE_UUID,
        primary: true,
        characteristics: vec![GattCharacteristic {
            uuid: MESSAGE_CHARACTERISTIC_UUID,
            properties: CharacteristicProperties::chat(),
            descriptors: vec![CCCD_UUID],
        }],
    }
}

// ----------------------------------------------------------------------------
// Negotiation
// ----------------------------------------------------------------------------

/// Why a discovered table cannot carry chat traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationFailure {
    ServiceMissing,
    CharacteristicMissing,
    NotificationsUnsupported,
}

impl NegotiationFailure {
    /// Log text for this failure
    pub fn describe(self) -> &'static str {
        match self {
            Self::ServiceMissing => "Chat service not found",
            Self::CharacteristicMissing => "Chat characteristic not found",
            Self::NotificationsUnsupported => "Chat characteristic does not support notifications",
        }
    }
}

/// Locate the chat characteristic and check it can be subscribed to
pub fn locate_chat_characteristic(
    table: &GattTable,
) -> Result<&GattCharacteristic, NegotiationFailure> {
    let service = table
        .service(CHAT_SERVICE_UUID)
        .ok_or(NegotiationFailure::ServiceMissing)?;
    let characteristic = service
        .characteristic(MESSAGE_CHARACTERISTIC_UUID)
        .ok_or(NegotiationFailure::CharacteristicMissing)?;
    if !characteristic.has_descriptor(CCCD_UUID) {
        return Err(NegotiationFailure::NotificationsUnsupported);
    }
    Ok(characteristic)
}

/// Whether a CCCD write turns push delivery on
pub fn is_enable_value(value: &[u8]) -> bool {
    value == ENABLE_NOTIFICATION_VALUE || value == ENABLE_INDICATION_VALUE
}

// ----------------------------------------------------------------------------
// Payload Codec
// ----------------------------------------------------------------------------

/// Encode a chat line for the wire
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode a wire payload; malformed UTF-8 is replaced, never rejected
pub fn decode_text(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::debug!("Payload is not valid UTF-8: {}", hex::encode(payload));
            String::from_utf8_lossy(payload).into_owned()
        }
    }
}
