//! Peripheral session state machine
//!
//! Publishes the chat service on a GATT server, advertises it and tracks
//! which connected centrals have enabled notifications. Outgoing chat lines
//! are pushed only to those subscribers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result, TransportError};
use crate::message_log::MessageLog;
use crate::protocol::{
    chat_service, decode_text, encode_text, is_enable_value, CCCD_UUID, CHAT_SERVICE_UUID,
    MESSAGE_CHARACTERISTIC_UUID,
};
use crate::transport::{GattStatus, PeripheralTransport, ServerEvent, ServerEvents};
use crate::types::{Message, PeerAddress, RequestId, ServerId};

// ----------------------------------------------------------------------------
// Server State
// ----------------------------------------------------------------------------

/// Lifecycle of the GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Stopped,
    /// Server open and service published, not advertising
    Publishing,
    Advertising,
}

impl PeripheralState {
    pub fn state_name(&self) -> &'static str {
        match self {
            PeripheralState::Stopped => "Stopped",
            PeripheralState::Publishing => "Publishing",
            PeripheralState::Advertising => "Advertising",
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, PeripheralState::Stopped)
    }
}

impl fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Mailbox
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum PeripheralCommand {
    Start,
    Stop,
    SendToSubscribers(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) enum PeripheralInput {
    Command(PeripheralCommand),
    Server(ServerId, ServerEvent),
}

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a running peripheral session
#[derive(Debug, Clone)]
pub struct PeripheralHandle {
    mailbox: mpsc::UnboundedSender<PeripheralInput>,
    state: watch::Receiver<PeripheralState>,
    advertising: watch::Receiver<bool>,
    connected: watch::Receiver<BTreeSet<PeerAddress>>,
    subscribers: watch::Receiver<BTreeSet<PeerAddress>>,
    messages: watch::Receiver<Vec<Message>>,
}

impl PeripheralHandle {
    fn post(&self, command: PeripheralCommand) -> Result<()> {
        self.mailbox
            .send(PeripheralInput::Command(command))
            .map_err(|_| EngineError::ActorStopped)
    }

    /// Open the server, publish the chat service and advertise it
    ///
    /// Any previous server instance is torn down first.
    pub fn start(&self) -> Result<()> {
        self.post(PeripheralCommand::Start)
    }

    /// Tear the server down; safe to call at any time
    pub fn stop(&self) -> Result<()> {
        self.post(PeripheralCommand::Stop)
    }

    /// Notify every subscribed central with a chat line
    pub fn send_to_subscribers(&self, text: impl Into<String>) -> Result<()> {
        self.post(PeripheralCommand::SendToSubscribers(text.into()))
    }

    /// Wait until the mailbox has drained, including any inputs produced
    /// while handling the requests queued before this call
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.post(PeripheralCommand::Flush(tx))?;
        rx.await.map_err(|_| EngineError::ActorStopped)
    }

    /// Stop the server and end the actor task
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.post(PeripheralCommand::Shutdown(tx))?;
        rx.await.map_err(|_| EngineError::ActorStopped)
    }

    pub fn state(&self) -> PeripheralState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PeripheralState> {
        self.state.clone()
    }

    pub fn is_advertising(&self) -> bool {
        *self.advertising.borrow()
    }

    pub fn watch_advertising(&self) -> watch::Receiver<bool> {
        self.advertising.clone()
    }

    /// Addresses of centrals currently connected, sorted
    pub fn connected(&self) -> Vec<PeerAddress> {
        self.connected.borrow().iter().cloned().collect()
    }

    /// Addresses currently subscribed to notifications, sorted
    pub fn subscribers(&self) -> Vec<PeerAddress> {
        self.subscribers.borrow().iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }
}

// ----------------------------------------------------------------------------
// Session Actor
// ----------------------------------------------------------------------------

/// Peripheral role session actor
pub struct PeripheralSession {
    transport: Arc<dyn PeripheralTransport>,
    config: EngineConfig,
    inbox: mpsc::UnboundedReceiver<PeripheralInput>,
    mailbox: mpsc::WeakUnboundedSender<PeripheralInput>,
    server: Option<ServerId>,
    last_server: ServerId,
    connected: watch::Sender<BTreeSet<PeerAddress>>,
    subscribers: watch::Sender<BTreeSet<PeerAddress>>,
    state: watch::Sender<PeripheralState>,
    advertising: watch::Sender<bool>,
    log: MessageLog,
}

impl PeripheralSession {
    /// Spawn the actor on the current tokio runtime
    pub fn spawn(
        transport: Arc<dyn PeripheralTransport>,
        config: EngineConfig,
    ) -> PeripheralHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(PeripheralState::Stopped);
        let (advertising, advertising_rx) = watch::channel(false);
        let (connected, connected_rx) = watch::channel(BTreeSet::new());
        let (subscribers, subscribers_rx) = watch::channel(BTreeSet::new());
        let log = MessageLog::new();

        let handle = PeripheralHandle {
            mailbox: mailbox.clone(),
            state: state_rx,
            advertising: advertising_rx,
            connected: connected_rx,
            subscribers: subscribers_rx,
            messages: log.subscribe(),
        };

        let session = Self {
            transport,
            config,
            inbox,
            mailbox: mailbox.downgrade(),
            server: None,
            last_server: ServerId::new(0),
            connected,
            subscribers,
            state,
            advertising,
            log,
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        debug!("Peripheral session started");
        while let Some(input) = self.inbox.recv().await {
            match input {
                PeripheralInput::Command(PeripheralCommand::Shutdown(done)) => {
                    self.teardown().await;
                    self.inbox.close();
                    let _ = done.send(());
                    break;
                }
                PeripheralInput::Command(command) => self.handle_command(command).await,
                PeripheralInput::Server(server, event) => {
                    self.handle_server_event(server, event).await
                }
            }
        }
        debug!("Peripheral session stopped");
    }

    async fn handle_command(&mut self, command: PeripheralCommand) {
        match command {
            PeripheralCommand::Start => self.start().await,
            PeripheralCommand::Stop => self.teardown().await,
            PeripheralCommand::SendToSubscribers(text) => self.send_to_subscribers(text).await,
            PeripheralCommand::Flush(done) => {
                if self.inbox.is_empty() {
                    let _ = done.send(());
                } else if let Some(mailbox) = self.mailbox.upgrade() {
                    // Requeue behind the inputs earlier requests produced
                    let _ = mailbox.send(PeripheralInput::Command(PeripheralCommand::Flush(done)));
                }
            }
            PeripheralCommand::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    fn set_state(&mut self, next: PeripheralState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Peripheral session {} -> {}", previous, next);
        }
    }

    fn set_advertising(&mut self, advertising: bool) {
        self.advertising.send_replace(advertising);
    }

    // ------------------------------------------------------------------------
    // Server Lifecycle
    // ------------------------------------------------------------------------

    async fn start(&mut self) {
        self.teardown().await;

        if !self.transport.is_available() {
            warn!("Start requested but Bluetooth is unavailable");
            self.log.info("Bluetooth is not available");
            return;
        }
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };

        let server = self.last_server.next();
        self.last_server = server;
        if let Err(e) = self
            .transport
            .open_server(ServerEvents::new(server, mailbox))
            .await
        {
            warn!("Opening GATT server failed: {}", e);
            self.log.error("Failed to open GATT server");
            return;
        }
        self.server = Some(server);

        if let Err(e) = self.transport.publish_service(server, &chat_service()).await {
            warn!("Publishing chat service on server {} failed: {}", server, e);
            self.log.error("Failed to publish chat service");
            self.teardown().await;
            return;
        }
        self.set_state(PeripheralState::Publishing);

        let advertised = self
            .transport
            .start_advertising(
                server,
                &self.config.advertise,
                &self.config.device_name,
                CHAT_SERVICE_UUID,
            )
            .await;
        match advertised
        {
            Ok(()) => {
                self.set_advertising(true);
                self.set_state(PeripheralState::Advertising);
                self.log.info("Server started & advertising");
            }
            Err(TransportError::Unavailable { reason }) => {
                warn!("No advertiser: {}", reason);
                self.log.error("BLE advertiser not available");
            }
            Err(e) => {
                warn!("Advertising request failed: {}", e);
                self.log.error(format!("Advertising failed: {}", e));
            }
        }
    }

    /// Release the server; never fails and never logs to the message log
    async fn teardown(&mut self) {
        if let Some(server) = self.server.take() {
            if let Err(e) = self.transport.stop_advertising(server).await {
                debug!("Stopping advertising on server {} failed: {}", server, e);
            }
            if let Err(e) = self.transport.close_server(server).await {
                debug!("Closing server {} failed: {}", server, e);
            }
            info!("Server {} stopped", server);
        }
        for members in [&self.connected, &self.subscribers] {
            members.send_if_modified(|set| {
                let changed = !set.is_empty();
                set.clear();
                changed
            });
        }
        self.set_advertising(false);
        self.set_state(PeripheralState::Stopped);
    }

    // ------------------------------------------------------------------------
    // Server Callbacks
    // ------------------------------------------------------------------------

    async fn handle_server_event(&mut self, server: ServerId, event: ServerEvent) {
        if self.server != Some(server) {
            debug!("Dropping {:?} from stale server {}", event, server);
            return;
        }

        match event {
            ServerEvent::ConnectionStateChanged { device, connected } => {
                if connected {
                    info!("Central {} connected", device);
                    self.connected.send_if_modified(|set| set.insert(device));
                } else {
                    info!("Central {} disconnected", device);
                    self.connected.send_if_modified(|set| set.remove(&device));
                    self.subscribers.send_if_modified(|set| set.remove(&device));
                }
            }
            ServerEvent::DescriptorWriteRequest {
                device,
                request,
                characteristic,
                descriptor,
                value,
                response_needed,
            } => {
                let status = if descriptor == CCCD_UUID
                    && characteristic == MESSAGE_CHARACTERISTIC_UUID
                {
                    let enable = is_enable_value(&value);
                    debug!("CCCD write from {}: enable={}", device, enable);
                    if enable {
                        self.subscribers
                            .send_if_modified(|set| set.insert(device.clone()));
                    } else {
                        self.subscribers.send_if_modified(|set| set.remove(&device));
                    }
                    GattStatus::Success
                } else {
                    debug!("Refusing write to descriptor {} from {}", descriptor, device);
                    GattStatus::Failure
                };
                if response_needed {
                    self.respond(server, &device, request, status).await;
                }
            }
            ServerEvent::CharacteristicWriteRequest {
                device,
                request,
                characteristic,
                value,
                response_needed,
            } => {
                let status = if characteristic == MESSAGE_CHARACTERISTIC_UUID {
                    self.log.received(decode_text(&value));
                    GattStatus::Success
                } else {
                    debug!(
                        "Refusing write to characteristic {} from {}",
                        characteristic, device
                    );
                    GattStatus::Failure
                };
                if response_needed {
                    self.respond(server, &device, request, status).await;
                }
            }
            ServerEvent::AdvertisingStarted => {
                debug!("Advertising confirmed on server {}", server);
            }
            ServerEvent::AdvertisingFailed { code } => {
                warn!("Advertising failed on server {}: {}", server, code);
                self.log.error(format!("Advertising failed: {}", code));
                self.set_advertising(false);
                self.set_state(PeripheralState::Publishing);
            }
        }
    }

    async fn respond(
        &self,
        server: ServerId,
        device: &PeerAddress,
        request: RequestId,
        status: GattStatus,
    ) {
        if let Err(e) = self.transport.respond(server, device, request, status).await {
            warn!("Response to {} failed: {}", device, e);
        }
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    async fn send_to_subscribers(&mut self, text: String) {
        let Some(server) = self.server else {
            self.log.error("Server not running");
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

        if let Err(e) = self
            .transport
            .set_value(server, MESSAGE_CHARACTERISTIC_UUID, &payload)
            .await
        {
            debug!("Updating characteristic value failed: {}", e);
        }

        let targets: SmallVec<[PeerAddress; 4]> =
            self.subscribers.borrow().iter().cloned().collect();
        let mut delivered = 0usize;
        for device in &targets {
            match self
                .transport
                .notify(server, device, MESSAGE_CHARACTERISTIC_UUID, &payload)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Notification to {} failed: {}", device, e),
            }
        }
        debug!("Pushed to {}/{} subscribers", delivered, targets.len());

        self.log.sent(text);
    }
}
