//! Transport connection contract
//!
//! A [`Connector`] opens one bidirectional channel to one agent. The caller
//! gets back a [`Connection`] handle for outbound traffic and an
//! [`EventStream`] carrying inbound messages and the final `Closed` event.
//! Each connector runs its I/O in a background pump task; nothing on the
//! pump side touches session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{AgentAddress, CommsError, Envelope, InProcessConnector, Result, WsConnector};

/// Inbound events from a connection
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Message received from an agent
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Correlation id of the request this answers, absent for pushes
    pub correlation_id: Option<String>,
    pub body: String,
    pub envelope: Envelope,
}

impl From<Envelope> for InboundMessage {
    fn from(envelope: Envelope) -> Self {
        Self {
            correlation_id: envelope.ack_id.clone(),
            body: envelope.body(),
            envelope,
        }
    }
}

/// Lifecycle and message events of one connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// The channel is gone; always the last event on the stream
    Closed { reason: String },
}

/// Handle to an open channel
///
/// Sending is fire-and-forget: success means the envelope was handed to the
/// pump task, not that the agent received it. Dropping the handle closes
/// the channel.
pub struct Connection {
    id: String,
    agent_id: String,
    outbound: Option<mpsc::UnboundedSender<Envelope>>,
    shutdown: Option<oneshot::Sender<()>>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Connection id, unique per open
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && self.open.load(Ordering::Acquire)
    }

    /// Hand an envelope to the transport
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_open() {
            return Err(CommsError::transport(format!(
                "connection to {} is closed",
                self.agent_id
            )));
        }
        match &self.outbound {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| CommsError::transport(format!("connection to {} is closed", self.agent_id))),
            None => Err(CommsError::transport("connection is closed")),
        }
    }

    /// Close the channel. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            tracing::debug!("Closed connection {} to {}", self.id, self.agent_id);
        }
        self.outbound = None;
        self.open.store(false, Ordering::Release);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Pump-side ends of a connection's channels
pub struct PumpChannels {
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
    pub shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl PumpChannels {
    /// Forward an inbound envelope to the observer
    pub fn deliver(&self, envelope: Envelope) {
        let _ = self.events.send(TransportEvent::Message(envelope.into()));
    }

    /// Mark the connection closed and emit the final event
    pub fn finish<S: Into<String>>(self, reason: S) {
        self.open.store(false, Ordering::Release);
        let _ = self.events.send(TransportEvent::Closed {
            reason: reason.into(),
        });
    }
}

/// Create the handle, event stream and pump channels for a new connection
pub fn connection_channels(agent_id: &str) -> (Connection, EventStream, PumpChannels) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let open = Arc::new(AtomicBool::new(true));

    let connection = Connection {
        id: uuid::Uuid::new_v4().to_string(),
        agent_id: agent_id.to_string(),
        outbound: Some(outbound_tx),
        shutdown: Some(shutdown_tx),
        open: Arc::clone(&open),
    };
    let pump = PumpChannels {
        outbound: outbound_rx,
        shutdown: shutdown_rx,
        events: events_tx,
        open,
    };

    (connection, events_rx, pump)
}

/// Opens connections to agents
///
/// Implementations must give up once `connect_timeout` has elapsed and
/// report [`CommsError::ConnectTimeout`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        address: &AgentAddress,
        connect_timeout: Duration,
    ) -> Result<(Connection, EventStream)>;

    /// Get connector name
    fn name(&self) -> &str;
}

/// Picks a connector from the address location
///
/// `Local` agents go through the in-process transport, everything else
/// over WebSocket.
#[derive(Clone, Default)]
pub struct LocationRouter {
    local: InProcessConnector,
    remote: WsConnector,
}

impl LocationRouter {
    pub fn new(local: InProcessConnector, remote: WsConnector) -> Self {
        Self { local, remote }
    }

    /// The in-process side, for registering local agents
    pub fn local(&self) -> &InProcessConnector {
        &self.local
    }
}

#[async_trait]
impl Connector for LocationRouter {
    async fn open(
        &self,
        address: &AgentAddress,
        connect_timeout: Duration,
    ) -> Result<(Connection, EventStream)> {
        if address.is_local() {
            self.local.open(address, connect_timeout).await
        } else {
            self.remote.open(address, connect_timeout).await
        }
    }

    fn name(&self) -> &str {
        "router"
    }
}
