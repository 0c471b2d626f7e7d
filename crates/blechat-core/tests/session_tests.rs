//! End-to-end tests of both session roles over the simulated radio

mod test_utils;

use std::sync::Arc;

use blechat_core::sim::{ScriptedDevice, SimFaults, SimRadio};
use blechat_core::*;
use test_utils::{chat_lines, Fixture, CENTRAL, PERIPHERAL};

// ----------------------------------------------------------------------------
// Full Exchange
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_in_both_directions() {
    let fixture = Fixture::new().connected().await;
    let Fixture {
        radio,
        central,
        server,
    } = &fixture;

    let peer = central.peers().into_iter().next().unwrap();
    assert_eq!(peer.address.as_str(), PERIPHERAL);
    assert_eq!(peer.display_name(), "blechat");
    assert_eq!(server.subscribers(), vec![PeerAddress::from(CENTRAL)]);

    let ready = central
        .messages()
        .iter()
        .filter(|m| m.text == "Ready. You can send messages.")
        .count();
    assert_eq!(ready, 1);

    central.send("hi").unwrap();
    fixture.settle().await;
    server.send_to_subscribers("hello back").unwrap();
    fixture.settle().await;

    assert_eq!(
        chat_lines(&central.messages()),
        vec![("hi".to_string(), true), ("hello back".to_string(), false)]
    );
    assert_eq!(
        chat_lines(&server.messages()),
        vec![("hi".to_string(), false), ("hello back".to_string(), true)]
    );

    let stats = radio.stats();
    assert_eq!(stats.writes(), 1);
    assert_eq!(stats.notifications(), 1);
    assert_eq!(
        radio.value_of(&PERIPHERAL.into()),
        Some(b"hello back".to_vec())
    );
}

#[tokio::test]
async fn test_connect_by_address_then_chat_with_echo_device() {
    let radio = SimRadio::new();
    radio.add_device(ScriptedDevice::chat("AA:BB", Some("echo")).with_echo());
    let central = CentralSession::spawn(Arc::new(radio.central(CENTRAL)), EngineConfig::default());

    central.start_scan().unwrap();
    central.flush().await.unwrap();
    central.connect_address("AA:BB").unwrap();
    central.flush().await.unwrap();
    assert_eq!(central.state(), CentralState::Ready);

    central.send("hello").unwrap();
    central.flush().await.unwrap();
    assert_eq!(
        chat_lines(&central.messages()),
        vec![("hello".to_string(), true), ("hello".to_string(), false)]
    );
    assert_eq!(radio.stats().writes(), 1);
}

#[tokio::test]
async fn test_connect_clears_log() {
    let fixture = Fixture::new().connected().await;
    fixture.central.send("before").unwrap();
    fixture.settle().await;

    fixture.central.connect_address(PERIPHERAL).unwrap();
    fixture.settle().await;

    let messages = fixture.central.messages();
    assert_eq!(messages[0].text, format!("Connecting to {} ...", PERIPHERAL));
    assert!(chat_lines(&messages).is_empty());
    assert_eq!(fixture.central.state(), CentralState::Ready);
}

// ----------------------------------------------------------------------------
// Connection Invariants
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_at_most_one_live_connection() {
    let fixture = Fixture::new();
    let second = PeripheralSession::spawn(
        Arc::new(fixture.radio.peripheral("P2")),
        EngineConfig::default().with_device_name("second"),
    );
    fixture.server.start().unwrap();
    second.start().unwrap();
    fixture.settle().await;
    second.flush().await.unwrap();

    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    assert_eq!(fixture.central.peers().len(), 2);

    fixture.central.connect_address(PERIPHERAL).unwrap();
    fixture.central.connect_address("P2").unwrap();
    fixture.settle().await;
    second.flush().await.unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Ready);
    assert!(fixture.server.connected().is_empty());
    assert!(fixture.server.subscribers().is_empty());
    assert_eq!(second.connected(), vec![PeerAddress::from(CENTRAL)]);

    let connecting: Vec<_> = fixture
        .central
        .messages()
        .into_iter()
        .filter(|m| m.text.starts_with("Connecting to"))
        .collect();
    assert_eq!(connecting.len(), 1);
    assert_eq!(connecting[0].text, "Connecting to P2 ...");

    let stats = fixture.radio.stats();
    assert_eq!(stats.connections(), 2);
    assert_eq!(stats.disconnections(), 1);
}

#[tokio::test]
async fn test_link_loss_clears_subscription() {
    let fixture = Fixture::new().connected().await;
    fixture
        .radio
        .drop_link(&CENTRAL.into(), &PERIPHERAL.into());
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Closed);
    assert_eq!(fixture.central.messages().last().unwrap().text, "Disconnected");
    assert!(fixture.server.subscribers().is_empty());

    fixture.server.send_to_subscribers("anyone?").unwrap();
    fixture.settle().await;
    assert_eq!(fixture.radio.stats().notifications(), 0);
    assert_eq!(chat_lines(&fixture.server.messages()).len(), 1);

    fixture.central.send("lost").unwrap();
    fixture.settle().await;
    assert_eq!(
        fixture.central.messages().last().unwrap().text,
        "Not connected to chat characteristic"
    );
}

#[tokio::test]
async fn test_server_restart_disconnects_central() {
    let fixture = Fixture::new().connected().await;
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Closed);
    assert_eq!(fixture.server.state(), PeripheralState::Advertising);
    assert!(fixture.server.subscribers().is_empty());
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let fixture = Fixture::new();
    fixture.server.stop().unwrap();
    fixture.server.stop().unwrap();
    fixture.central.disconnect().unwrap();
    fixture.central.disconnect().unwrap();
    fixture.central.stop_scan().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.server.state(), PeripheralState::Stopped);
    assert_eq!(fixture.central.state(), CentralState::Idle);
    assert!(fixture.server.messages().is_empty());
    assert!(fixture.central.messages().is_empty());

    let fixture = fixture.connected().await;
    fixture.central.disconnect().unwrap();
    fixture.central.disconnect().unwrap();
    fixture.server.stop().unwrap();
    fixture.server.stop().unwrap();
    fixture.settle().await;
    assert_eq!(fixture.central.state(), CentralState::Closed);
    assert!(!fixture.server.is_advertising());
    assert!(fixture.server.connected().is_empty());
}

// ----------------------------------------------------------------------------
// Negotiation Failures
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_characteristic_is_terminal() {
    let fixture = Fixture::new();
    fixture
        .radio
        .add_device(ScriptedDevice::without_chat_characteristic("AA:BB"));
    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    fixture.central.connect_address("AA:BB").unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Closed);
    let errors: Vec<_> = fixture
        .central
        .messages()
        .into_iter()
        .filter(|m| m.is_error())
        .collect();
    assert_eq!(errors.len(), 1);

    let writes_before = fixture.radio.stats().writes();
    for _ in 0..3 {
        fixture.central.send("hi").unwrap();
    }
    fixture.settle().await;
    assert_eq!(fixture.radio.stats().writes(), writes_before);
    let errors = fixture
        .central
        .messages()
        .iter()
        .filter(|m| m.is_error())
        .count();
    assert_eq!(errors, 4);
}

#[tokio::test]
async fn test_discovery_failure_closes() {
    let fixture = Fixture::new();
    fixture.radio.add_device(ScriptedDevice::chat("AA:BB", None));
    fixture
        .radio
        .set_faults(SimFaults::none().with_discovery_failure());
    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    fixture.central.connect_address("AA:BB").unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Closed);
    let last = fixture.central.messages().last().cloned().unwrap();
    assert!(last.is_error());
    assert!(last.text.starts_with("Service discovery failed"));
}

#[tokio::test]
async fn test_rejected_subscription_is_informational() {
    let fixture = Fixture::new();
    fixture
        .radio
        .add_device(ScriptedDevice::chat("AA:BB", None).rejecting_subscription());
    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    fixture.central.connect_address("AA:BB").unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Ready);
    let last = fixture.central.messages().last().cloned().unwrap();
    assert_eq!(last.kind, MessageKind::Info);
    assert!(fixture.central.messages().iter().all(|m| !m.is_error()));
}

#[tokio::test]
async fn test_rejected_write_keeps_session() {
    let fixture = Fixture::new().connected().await;
    fixture
        .radio
        .set_faults(SimFaults::none().with_rejected_writes());
    fixture.central.send("hi").unwrap();
    fixture.settle().await;

    assert_eq!(fixture.central.state(), CentralState::Ready);
    assert_eq!(fixture.central.messages().last().unwrap().text, "Send failed");
    assert!(chat_lines(&fixture.server.messages()).is_empty());
}

// ----------------------------------------------------------------------------
// Peripheral Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_publish_failure_keeps_server_stopped() {
    let fixture = Fixture::new();
    fixture
        .radio
        .set_faults(SimFaults::none().with_publish_failure());
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.server.state(), PeripheralState::Stopped);
    assert!(!fixture.server.is_advertising());
    let messages = fixture.server.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_error());
}

#[tokio::test]
async fn test_open_failure_keeps_server_stopped() {
    let fixture = Fixture::new();
    fixture.radio.set_faults(SimFaults::none().with_open_failure());
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.server.state(), PeripheralState::Stopped);
    assert!(!fixture.server.is_advertising());
    let messages = fixture.server.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Failed to open GATT server");
    assert_eq!(messages[0].kind, MessageKind::Error);
}

#[tokio::test]
async fn test_missing_advertiser_still_serves() {
    let fixture = Fixture::new();
    fixture
        .radio
        .set_faults(SimFaults::none().with_no_advertiser());
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.server.state(), PeripheralState::Publishing);
    assert!(!fixture.server.is_advertising());
    assert_eq!(
        fixture.server.messages().last().unwrap().text,
        "BLE advertiser not available"
    );
}

#[tokio::test]
async fn test_async_advertising_failure() {
    let fixture = Fixture::new();
    fixture.radio.set_faults(SimFaults {
        advertise_failure: Some(2),
        ..SimFaults::none()
    });
    let mut advertising = fixture.server.watch_advertising();
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert_eq!(fixture.server.state(), PeripheralState::Publishing);
    assert!(!*advertising.borrow_and_update());
    assert_eq!(
        fixture.server.messages().last().unwrap().text,
        "Advertising failed: 2"
    );
}

#[tokio::test]
async fn test_zero_subscribers_still_logs() {
    let fixture = Fixture::new();
    fixture.server.start().unwrap();
    fixture.settle().await;
    let before = fixture.server.messages().len();

    fixture.server.send_to_subscribers("nobody home").unwrap();
    fixture.settle().await;
    let messages = fixture.server.messages();
    assert_eq!(messages.len(), before + 1);
    assert!(messages.last().unwrap().from_self());
    assert_eq!(fixture.radio.stats().notifications(), 0);
}

// ----------------------------------------------------------------------------
// Radio Availability and Scanning
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_radio_off_is_a_noop() {
    let fixture = Fixture::new();
    fixture.radio.set_faults(SimFaults::radio_off());
    fixture.central.start_scan().unwrap();
    fixture.server.start().unwrap();
    fixture.settle().await;

    assert!(!fixture.central.is_scanning());
    assert_eq!(fixture.central.state(), CentralState::Idle);
    assert_eq!(fixture.server.state(), PeripheralState::Stopped);
    let info = fixture.central.messages();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].kind, MessageKind::Info);
}

#[tokio::test]
async fn test_rescan_refreshes_registry() {
    let fixture = Fixture::new();
    fixture
        .radio
        .add_device(ScriptedDevice::chat("AA:BB", Some("phone")).with_rssi(-80));
    fixture
        .radio
        .add_device(ScriptedDevice::other("CC:DD", None));
    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    fixture.radio.sight(&"AA:BB".into(), -45);
    fixture.settle().await;

    let peers = fixture.central.peers();
    assert_eq!(peers.len(), 2);
    let phone = peers.iter().find(|p| p.address.as_str() == "AA:BB").unwrap();
    assert_eq!(phone.rssi, -45);
    assert_eq!(phone.display_name(), "phone");

    fixture.central.stop_scan().unwrap();
    fixture.settle().await;
    fixture.radio.sight(&"AA:BB".into(), -30);
    fixture.settle().await;
    assert_eq!(
        fixture
            .central
            .peers()
            .iter()
            .find(|p| p.address.as_str() == "AA:BB")
            .unwrap()
            .rssi,
        -45
    );
}

#[tokio::test]
async fn test_service_filter() {
    let radio = SimRadio::new();
    radio.add_device(ScriptedDevice::chat("AA:BB", None));
    radio.add_device(ScriptedDevice::other("CC:DD", Some("speaker")));
    let central = CentralSession::spawn(
        Arc::new(radio.central(CENTRAL)),
        EngineConfig::default().with_service_filter(true),
    );
    central.start_scan().unwrap();
    central.flush().await.unwrap();

    let peers = central.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].address.as_str(), "AA:BB");
}

#[tokio::test]
async fn test_malformed_payload_is_replaced() {
    let fixture = Fixture::new();
    fixture.radio.add_device(ScriptedDevice::chat("AA:BB", None));
    fixture.central.start_scan().unwrap();
    fixture.settle().await;
    fixture.central.connect_address("AA:BB").unwrap();
    fixture.settle().await;

    assert_eq!(fixture.radio.push_from(&"AA:BB".into(), &[0x6F, 0xFE, 0x6B]), 1);
    fixture.settle().await;
    assert_eq!(
        chat_lines(&fixture.central.messages()),
        vec![("o\u{FFFD}k".to_string(), false)]
    );
}

#[tokio::test]
async fn test_message_observer_sees_appends() {
    let fixture = Fixture::new().connected().await;
    let mut messages = fixture.central.watch_messages();
    messages.borrow_and_update();

    fixture.central.send("observed").unwrap();
    messages.changed().await.unwrap();
    let latest = messages.borrow_and_update().last().cloned().unwrap();
    assert_eq!(latest.text, "observed");
}

#[tokio::test]
async fn test_shutdown_both_roles() {
    let fixture = Fixture::new().connected().await;
    fixture.server.shutdown().await.unwrap();
    fixture.central.shutdown().await.unwrap();

    assert!(matches!(
        fixture.central.send("late"),
        Err(EngineError::ActorStopped)
    ));
    assert!(matches!(
        fixture.server.flush().await,
        Err(EngineError::ActorStopped)
    ));
}
