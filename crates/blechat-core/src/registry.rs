//! Peer registry
//!
//! Address-keyed set of discovered peers. The owning session actor is the only
//! writer; readers hold a [`watch::Receiver`] and always see a whole table,
//! never one that is halfway through an update.

use std::collections::HashMap;

use tokio::sync::watch;
use tracing::trace;

use crate::types::{Peer, PeerAddress};

// ----------------------------------------------------------------------------
// Peer Table
// ----------------------------------------------------------------------------

/// Immutable view of the registry at one point in time
///
/// Peers are kept in first-sighting order, which stays stable across updates.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: Vec<Peer>,
    index: HashMap<PeerAddress, usize>,
}

impl PeerTable {
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn get(&self, address: &PeerAddress) -> Option<&Peer> {
        self.index.get(address).map(|&slot| &self.peers[slot])
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn upsert(&mut self, peer: Peer) {
        match self.index.get(&peer.address) {
            Some(&slot) => {
                let existing = &mut self.peers[slot];
                existing.rssi = peer.rssi;
                existing.handle = peer.handle;
                if peer.name.is_some() {
                    existing.name = peer.name;
                }
            }
            None => {
                self.index.insert(peer.address.clone(), self.peers.len());
                self.peers.push(peer);
            }
        }
    }

    fn clear(&mut self) {
        self.peers.clear();
        self.index.clear();
    }
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// Writer side of the peer table
#[derive(Debug)]
pub struct PeerRegistry {
    table: watch::Sender<PeerTable>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (table, _) = watch::channel(PeerTable::default());
        Self { table }
    }

    /// Forget every peer; called when a new scan cycle starts
    pub fn clear(&self) {
        self.table.send_modify(PeerTable::clear);
    }

    /// Insert or refresh a peer by address and publish the new table
    ///
    /// A sighting without a name keeps the name learned earlier.
    pub fn observe(&self, peer: Peer) {
        trace!("Observed {} at {} dBm", peer.address, peer.rssi);
        self.table.send_modify(|table| table.upsert(peer));
    }

    /// Current peers in stable order
    pub fn snapshot(&self) -> Vec<Peer> {
        self.table.borrow().peers.clone()
    }

    /// Look up a single peer
    pub fn get(&self, address: &PeerAddress) -> Option<Peer> {
        self.table.borrow().get(address).cloned()
    }

    /// Register an observer that is woken on every publication
    pub fn subscribe(&self) -> watch::Receiver<PeerTable> {
        self.table.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerHandle;
    use proptest::prelude::*;

    fn peer(address: &str, name: Option<&str>, rssi: i16) -> Peer {
        Peer::new(
            address.into(),
            name.map(str::to_string),
            rssi,
            PeerHandle::new(address),
        )
    }

    #[test]
    fn test_observe_dedups_by_address() {
        let registry = PeerRegistry::new();
        registry.observe(peer("AA:BB", Some("phone"), -70));
        registry.observe(peer("CC:DD", None, -50));
        registry.observe(peer("AA:BB", Some("phone"), -40));

        let peers = registry.snapshot();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address.as_str(), "AA:BB");
        assert_eq!(peers[0].rssi, -40);
        assert_eq!(peers[1].address.as_str(), "CC:DD");
    }

    #[test]
    fn test_name_is_resolved_lazily() {
        let registry = PeerRegistry::new();
        registry.observe(peer("AA:BB", None, -70));
        assert_eq!(registry.snapshot()[0].display_name(), "Unknown");

        registry.observe(peer("AA:BB", Some("phone"), -65));
        registry.observe(peer("AA:BB", None, -60));
        let found = registry.get(&"AA:BB".into()).unwrap();
        assert_eq!(found.name.as_deref(), Some("phone"));
        assert_eq!(found.rssi, -60);
    }

    #[test]
    fn test_clear_publishes_empty_table() {
        let registry = PeerRegistry::new();
        let mut observer = registry.subscribe();
        registry.observe(peer("AA:BB", None, -70));
        assert!(observer.has_changed().unwrap());
        assert_eq!(observer.borrow_and_update().len(), 1);

        registry.clear();
        assert!(observer.has_changed().unwrap());
        assert!(observer.borrow_and_update().is_empty());
        assert!(registry.snapshot().is_empty());
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_address(
            sightings in proptest::collection::vec((0u8..6, -100i16..0), 1..64)
        ) {
            let registry = PeerRegistry::new();
            let mut latest: HashMap<String, i16> = HashMap::new();
            for (slot, rssi) in &sightings {
                let address = format!("00:00:00:00:00:0{}", slot);
                registry.observe(peer(&address, None, *rssi));
                latest.insert(address, *rssi);
            }

            let peers = registry.snapshot();
            prop_assert_eq!(peers.len(), latest.len());
            for found in &peers {
                prop_assert_eq!(Some(&found.rssi), latest.get(found.address.as_str()));
            }
        }
    }
}
