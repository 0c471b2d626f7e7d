//! Shared fixtures for the end-to-end session tests
//!
//! Builds both roles on one [`SimRadio`] and settles the two actors against
//! each other, since a request on one side can queue events on the other.

#![allow(dead_code)]

use std::sync::Arc;

use blechat_core::sim::SimRadio;
use blechat_core::{
    CentralHandle, CentralSession, CentralState, EngineConfig, PeripheralHandle,
    PeripheralSession,
};

pub const CENTRAL: &str = "C0:00:00:00:00:01";
pub const PERIPHERAL: &str = "P0:00:00:00:00:01";

/// Both roles on a shared radio
pub struct Fixture {
    pub radio: SimRadio,
    pub central: CentralHandle,
    pub server: PeripheralHandle,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let radio = SimRadio::new();
        let central = CentralSession::spawn(Arc::new(radio.central(CENTRAL)), config.clone());
        let server = PeripheralSession::spawn(Arc::new(radio.peripheral(PERIPHERAL)), config);
        Self {
            radio,
            central,
            server,
        }
    }

    /// Flush both actors until cross-role cascades have run out
    pub async fn settle(&self) {
        for _ in 0..4 {
            self.central.flush().await.unwrap();
            self.server.flush().await.unwrap();
        }
    }

    /// Start the server, scan for it and bring the central to `Ready`
    pub async fn connected(self) -> Self {
        self.server.start().unwrap();
        self.settle().await;
        self.central.start_scan().unwrap();
        self.settle().await;
        self.central.connect_address(PERIPHERAL).unwrap();
        self.settle().await;
        assert_eq!(self.central.state(), CentralState::Ready);
        self
    }
}

/// Texts of all chat lines in a log, tagged with who wrote them
pub fn chat_lines(messages: &[blechat_core::Message]) -> Vec<(String, bool)> {
    messages
        .iter()
        .filter(|m| m.is_chat())
        .map(|m| (m.text.clone(), m.from_self()))
        .collect()
}
