//! Central session state machine
//!
//! Owns at most one outbound link and walks it through
//! `Connecting -> DiscoveringServices -> Ready`, with any failure or
//! disconnect landing in `Closed`. The session also runs discovery scans and
//! feeds sightings into the [`PeerRegistry`].
//!
//! All inputs (user commands and adapter events) go through one mailbox and
//! are handled one at a time by the actor task, so registry, log and link
//! state are only ever touched from that task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::message_log::MessageLog;
use crate::protocol::{
    decode_text, encode_text, locate_chat_characteristic, CHAT_SERVICE_UUID,
    MESSAGE_CHARACTERISTIC_UUID,
};
use crate::registry::{PeerRegistry, PeerTable};
use crate::transport::{CentralTransport, LinkEvent, LinkEvents, Observation, ScanEvents};
use crate::types::{LinkId, Message, Peer, PeerAddress, ScanId};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle of the central session's link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralState {
    /// No connection has been requested yet
    Idle,
    Connecting,
    DiscoveringServices,
    /// Notifications are enabled and writes are allowed
    Ready,
    /// The last link ended; a new `connect` is required
    Closed,
}

impl CentralState {
    pub fn state_name(&self) -> &'static str {
        match self {
            CentralState::Idle => "Idle",
            CentralState::Connecting => "Connecting",
            CentralState::DiscoveringServices => "DiscoveringServices",
            CentralState::Ready => "Ready",
            CentralState::Closed => "Closed",
        }
    }

    /// True while a link is being established
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CentralState::Connecting | CentralState::DiscoveringServices
        )
    }
}

impl fmt::Display for CentralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Mailbox
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum CentralCommand {
    StartScan,
    StopScan,
    Connect(Peer),
    ConnectAddress(PeerAddress),
    Disconnect,
    Send(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) enum CentralInput {
    Command(CentralCommand),
    Scan(ScanId, Observation),
    Link(LinkId, LinkEvent),
    ConnectTimeout(LinkId),
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a running central session
///
/// Every operation only queues a request and returns; outcomes show up in
/// the observable state and the message log.
#[derive(Debug, Clone)]
pub struct CentralHandle {
    mailbox: mpsc::UnboundedSender<CentralInput>,
    state: watch::Receiver<CentralState>,
    peers: watch::Receiver<PeerTable>,
    messages: watch::Receiver<Vec<Message>>,
    scanning: watch::Receiver<bool>,
}

impl CentralHandle {
    fn post(&self, command: CentralCommand) -> Result<()> {
        self.mailbox
            .send(CentralInput::Command(command))
            .map_err(|_| EngineError::ActorStopped)
    }

    /// Start a scan cycle; ignored while one is running
    pub fn start_scan(&self) -> Result<()> {
        self.post(CentralCommand::StartScan)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.post(CentralCommand::StopScan)
    }

    /// Connect to `peer`, closing any existing link first
    pub fn connect(&self, peer: Peer) -> Result<()> {
        self.post(CentralCommand::Connect(peer))
    }

    /// Connect to a peer already present in the registry
    pub fn connect_address(&self, address: impl Into<PeerAddress>) -> Result<()> {
        self.post(CentralCommand::ConnectAddress(address.into()))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.post(CentralCommand::Disconnect)
    }

    /// Send a chat line over the ready link
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.post(CentralCommand::Send(text.into()))
    }

    /// Wait until the mailbox has drained, including any inputs produced
    /// while handling the requests queued before this call
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.post(CentralCommand::Flush(tx))?;
        rx.await.map_err(|_| EngineError::ActorStopped)
    }

    /// Stop scanning, drop the link and end the actor task
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.post(CentralCommand::Shutdown(tx))?;
        rx.await.map_err(|_| EngineError::ActorStopped)
    }

    pub fn state(&self) -> CentralState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CentralState> {
        self.state.clone()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.borrow().peers().to_vec()
    }

    pub fn watch_peers(&self) -> watch::Receiver<PeerTable> {
        self.peers.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }
}

// ----------------------------------------------------------------------------
// Session Actor
// ----------------------------------------------------------------------------

/// The one outbound link the session currently owns
#[derive(Debug)]
struct Link {
    id: LinkId,
    peer: PeerAddress,
    /// Set once the chat characteristic is negotiated
    characteristic: Option<Uuid>,
}

/// Central role session actor
pub struct CentralSession {
    transport: Arc<dyn CentralTransport>,
    config: EngineConfig,
    inbox: mpsc::UnboundedReceiver<CentralInput>,
    mailbox: mpsc::WeakUnboundedSender<CentralInput>,
    scan: Option<ScanId>,
    last_scan: ScanId,
    link: Option<Link>,
    last_link: LinkId,
    state: watch::Sender<CentralState>,
    scanning: watch::Sender<bool>,
    registry: PeerRegistry,
    log: MessageLog,
}

impl CentralSession {
    /// Spawn the actor on the current tokio runtime
    pub fn spawn(transport: Arc<dyn CentralTransport>, config: EngineConfig) -> CentralHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(CentralState::Idle);
        let (scanning, scanning_rx) = watch::channel(false);
        let registry = PeerRegistry::new();
        let log = MessageLog::new();

        let handle = CentralHandle {
            mailbox: mailbox.clone(),
            state: state_rx,
            peers: registry.subscribe(),
            messages: log.subscribe(),
            scanning: scanning_rx,
        };

        let session = Self {
            transport,
            config,
            inbox,
            mailbox: mailbox.downgrade(),
            scan: None,
            last_scan: ScanId::new(0),
            link: None,
            last_link: LinkId::new(0),
            state,
            scanning,
            registry,
            log,
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        debug!("Central session started");
        while let Some(input) = self.inbox.recv().await {
            match input {
                CentralInput::Command(CentralCommand::Shutdown(done)) => {
                    self.stop_scan().await;
                    self.release_link().await;
                    self.inbox.close();
                    let _ = done.send(());
                    break;
                }
                CentralInput::Command(command) => self.handle_command(command).await,
                CentralInput::Scan(scan, observation) => self.handle_observation(scan, observation),
                CentralInput::Link(link, event) => self.handle_link_event(link, event).await,
                CentralInput::ConnectTimeout(link) => self.handle_timeout(link).await,
            }
        }
        debug!("Central session stopped");
    }

    async fn handle_command(&mut self, command: CentralCommand) {
        match command {
            CentralCommand::StartScan => self.start_scan().await,
            CentralCommand::StopScan => self.stop_scan().await,
            CentralCommand::Connect(peer) => self.connect(peer).await,
            CentralCommand::ConnectAddress(address) => match self.registry.get(&address) {
                Some(peer) => self.connect(peer).await,
                None => {
                    warn!("Connect requested for unseen device {}", address);
                    self.log.error(format!("Device {} has not been seen", address));
                }
            },
            CentralCommand::Disconnect => self.disconnect().await,
            CentralCommand::Send(text) => self.send(text).await,
            CentralCommand::Flush(done) => {
                if self.inbox.is_empty() {
                    let _ = done.send(());
                } else if let Some(mailbox) = self.mailbox.upgrade() {
                    // Requeue behind the inputs earlier requests produced
                    let _ = mailbox.send(CentralInput::Command(CentralCommand::Flush(done)));
                }
            }
            CentralCommand::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    fn set_state(&mut self, next: CentralState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Central session {} -> {}", previous, next);
        }
    }

    fn current_state(&self) -> CentralState {
        *self.state.borrow()
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    async fn start_scan(&mut self) {
        if self.scan.is_some() {
            debug!("Scan already running");
            return;
        }
        if !self.transport.is_available() {
            warn!("Scan requested but Bluetooth is unavailable");
            self.log.info("Bluetooth is not available");
            return;
        }
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };

        self.registry.clear();
        let scan = self.last_scan.next();
        self.last_scan = scan;
        let filter = self.config.filter_by_service.then_some(CHAT_SERVICE_UUID);

        match self
            .transport
            .start_scan(filter, ScanEvents::new(scan, mailbox))
            .await
        {
            Ok(()) => {
                info!("Scan {} started", scan);
                self.scan = Some(scan);
                self.scanning.send_replace(true);
            }
            Err(e) => {
                warn!("Failed to start scan: {}", e);
                self.log.error(format!("Scan failed: {}", e));
            }
        }
    }

    async fn stop_scan(&mut self) {
        let Some(scan) = self.scan.take() else {
            return;
        };
        if let Err(e) = self.transport.stop_scan().await {
            debug!("Stopping scan {} failed: {}", scan, e);
        }
        self.scanning.send_replace(false);
        info!("Scan {} stopped", scan);
    }

    fn handle_observation(&mut self, scan: ScanId, observation: Observation) {
        if self.scan != Some(scan) {
            debug!("Dropping sighting from finished scan {}", scan);
            return;
        }
        if self.config.filter_by_service && !observation.advertises(CHAT_SERVICE_UUID) {
            return;
        }
        self.registry.observe(Peer::new(
            observation.address,
            observation.name,
            observation.rssi,
            observation.handle,
        ));
    }

    // ------------------------------------------------------------------------
    // Link Lifecycle
    // ------------------------------------------------------------------------

    async fn connect(&mut self, peer: Peer) {
        if !self.transport.is_available() {
            warn!("Connect requested but Bluetooth is unavailable");
            self.log.info("Bluetooth is not available");
            return;
        }
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };

        self.release_link().await;
        self.log.clear();
        self.log.info(format!("Connecting to {} ...", peer.address));

        let link = self.last_link.next();
        self.last_link = link;
        self.link = Some(Link {
            id: link,
            peer: peer.address.clone(),
            characteristic: None,
        });
        self.set_state(CentralState::Connecting);

        let events = LinkEvents::new(link, mailbox.clone());
        if let Err(e) = self.transport.connect(&peer.handle, events).await {
            warn!("Connect to {} failed: {}", peer.address, e);
            self.log.error(format!("Connection failed: {}", e));
            self.link = None;
            self.set_state(CentralState::Closed);
            return;
        }

        if let Some(timeout) = self.config.connect_timeout {
            spawn_connect_timer(mailbox, link, timeout);
        }
    }

    /// Drop the current link without logging, as a superseding connect does
    async fn release_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Releasing link {} to {}", link.id, link.peer);
            if let Err(e) = self.transport.disconnect(link.id).await {
                debug!("Disconnect of link {} failed: {}", link.id, e);
            }
        }
    }

    /// End the attempt after a negotiation failure
    async fn fail_link(&mut self, reason: &str) {
        self.log.error(reason);
        self.release_link().await;
        self.set_state(CentralState::Closed);
    }

    async fn disconnect(&mut self) {
        if self.link.is_none() {
            return;
        }
        self.release_link().await;
        self.set_state(CentralState::Closed);
        self.log.info("Disconnected");
    }

    async fn handle_timeout(&mut self, link: LinkId) {
        let current = self.link.as_ref().map(|l| l.id);
        if current != Some(link) || !self.current_state().is_pending() {
            return;
        }
        warn!("Link {} timed out in {}", link, self.current_state());
        self.fail_link("Connection timed out").await;
    }

    async fn handle_link_event(&mut self, link: LinkId, event: LinkEvent) {
        let current = self.link.as_ref().map(|l| l.id);
        if current != Some(link) {
            debug!("Dropping {:?} from stale link {}", event, link);
            return;
        }

        match event {
            LinkEvent::Connected => {
                if self.current_state() != CentralState::Connecting {
                    debug!("Ignoring repeated connect on link {}", link);
                    return;
                }
                self.set_state(CentralState::DiscoveringServices);
                if let Err(e) = self.transport.discover_services(link).await {
                    warn!("Service discovery request failed: {}", e);
                    self.fail_link(&format!("Service discovery failed: {}", e))
                        .await;
                }
            }
            LinkEvent::Disconnected => {
                self.release_link().await;
                self.set_state(CentralState::Closed);
                self.log.info("Disconnected");
            }
            LinkEvent::ServicesDiscovered(result) => {
                if self.current_state() != CentralState::DiscoveringServices {
                    debug!("Ignoring unexpected discovery result on link {}", link);
                    return;
                }
                match result {
                    Ok(table) => {
                        if let Err(failure) = locate_chat_characteristic(&table) {
                            warn!("Negotiation failed on link {}: {:?}", link, failure);
                            self.fail_link(failure.describe()).await;
                            return;
                        }
                        self.enable_notifications(link).await;
                    }
                    Err(status) => {
                        warn!("Service discovery failed on link {}: {}", link, status);
                        self.fail_link(&format!("Service discovery failed: {}", status))
                            .await;
                    }
                }
            }
            LinkEvent::DescriptorWritten { ok: true } => {
                debug!("Notifications confirmed on link {}", link);
            }
            LinkEvent::DescriptorWritten { ok: false } => {
                warn!("Peer rejected the notification subscription on link {}", link);
                self.log.info("Notification subscription was rejected");
            }
            LinkEvent::Notification {
                characteristic,
                value,
            } => {
                if characteristic != MESSAGE_CHARACTERISTIC_UUID {
                    debug!("Ignoring notification from {}", characteristic);
                    return;
                }
                self.log.received(decode_text(&value));
            }
        }
    }

    async fn enable_notifications(&mut self, link: LinkId) {
        if let Err(e) = self
            .transport
            .enable_notifications(link, MESSAGE_CHARACTERISTIC_UUID)
            .await
        {
            warn!("Enabling notifications failed on link {}: {}", link, e);
            self.fail_link(&format!("Could not enable notifications: {}", e))
                .await;
            return;
        }
        if let Some(current) = self.link.as_mut() {
            current.characteristic = Some(MESSAGE_CHARACTERISTIC_UUID);
        }
        self.set_state(CentralState::Ready);
        self.log.info("Ready. You can send messages.");
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    async fn send(&mut self, text: String) {
        let target = self
            .link
            .as_ref()
            .and_then(|link| link.characteristic.map(|c| (link.id, c)));
        let Some((link, characteristic)) = target else {
            self.log.error("Not connected to chat characteristic");
            return;
        };

        let payload = encode_text(&text);
        if payload.len() > self.config.max_payload_len {
            self.log.error(format!(
                "Message too long ({} bytes, limit {})",
                payload.len(),
                self.config.max_payload_len
            ));
            return;
        }

        match self
            .transport
            .write_characteristic(link, characteristic, &payload)
            .await
        {
            Ok(()) => {
                self.log.sent(text);
            }
            Err(e) => {
                warn!("Write on link {} rejected: {}", link, e);
                self.log.error("Send failed");
            }
        }
    }
}

fn spawn_connect_timer(mailbox: mpsc::UnboundedSender<CentralInput>, link: LinkId, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = mailbox.send(CentralInput::ConnectTimeout(link));
    });
}
