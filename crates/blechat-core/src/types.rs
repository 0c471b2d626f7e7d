//! Core types shared by both roles
//!
//! Newtypes keep addresses, adapter handles and generation ids from being
//! mixed up with one another.

use core::fmt;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Stable address of a remote device, the registry key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque token minted by a transport adapter to find its device object again
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle(String);

impl PeerHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A discoverable remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable address (unique key)
    pub address: PeerAddress,
    /// Advertised name, if one has been seen yet
    pub name: Option<String>,
    /// Signal strength of the latest sighting in dBm
    pub rssi: i16,
    /// Adapter handle used to connect
    pub handle: PeerHandle,
}

impl Peer {
    pub fn new(
        address: PeerAddress,
        name: Option<String>,
        rssi: i16,
        handle: PeerHandle,
    ) -> Self {
        Self {
            address,
            name,
            rssi,
            handle,
        }
    }

    /// Name for display, `"Unknown"` until the device reveals one
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

// ----------------------------------------------------------------------------
// Generation Ids
// ----------------------------------------------------------------------------

macro_rules! generation_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            /// The id that supersedes this one
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

generation_id!(
    /// Identifies one scan cycle
    ScanId
);
generation_id!(
    /// Identifies one outbound connection attempt
    LinkId
);
generation_id!(
    /// Identifies one opened GATT server instance
    ServerId
);

/// Adapter-assigned id of an inbound request that may need a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Which side produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote,
}

/// What a log entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A chat line typed by a user
    Chat,
    /// Progress note from the engine
    Info,
    /// Failure note from the engine
    Error,
}

/// One immutable entry in the message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the log, assigned on append
    pub seq: u64,
    pub text: String,
    pub origin: Origin,
    pub kind: MessageKind,
}

impl Message {
    /// True if this entry was produced on this device
    pub fn from_self(&self) -> bool {
        self.origin == Origin::Local
    }

    pub fn is_chat(&self) -> bool {
        self.kind == MessageKind::Chat
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.origin) {
            (MessageKind::Chat, Origin::Local) => write!(f, "me: {}", self.text),
            (MessageKind::Chat, Origin::Remote) => write!(f, "them: {}", self.text),
            (MessageKind::Info, _) => write!(f, "-- {}", self.text),
            (MessageKind::Error, _) => write!(f, "!! {}", self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let peer = Peer::new("AA:BB".into(), None, -60, PeerHandle::new("h1"));
        assert_eq!(peer.display_name(), "Unknown");

        let named = Peer {
            name: Some("phone".to_string()),
            ..peer
        };
        assert_eq!(named.display_name(), "phone");
    }

    #[test]
    fn test_generation_ids_advance() {
        let link = LinkId::new(7);
        assert_eq!(link.next().get(), 8);
        assert!(link < link.next());
        assert_eq!(link.to_string(), "#7");
    }

    #[test]
    fn test_message_rendering() {
        let msg = Message {
            seq: 0,
            text: "hi".to_string(),
            origin: Origin::Remote,
            kind: MessageKind::Chat,
        };
        assert!(!msg.from_self());
        assert_eq!(msg.to_string(), "them: hi");
    }
}
