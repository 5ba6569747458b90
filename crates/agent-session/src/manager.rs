//! Session manager actor
//!
//! One task owns every piece of session state and handles commands one at a
//! time. Nothing in the actor awaits I/O:
//! - connect attempts run in spawned tasks and post `Opened` back
//! - transport events are forwarded by a per-connection task
//! - replies are produced by the fallback chain in a spawned task
//!
//! Everything posted back is tagged with the epoch it belongs to. Results
//! for a session or attempt that has since been replaced are dropped, which
//! is how a switch or disconnect cancels work already in flight.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use agent_comms::{
    AddressResolver, AgentAddress, AgentDescriptor, AgentStatus, CommsError, Connection,
    Connector, CorrelationIds, Correlator, Delivery, DeliverySource, DiscoveryCache, EventStream,
    FallbackChain, LocationRouter, TransportEvent,
};
use agent_core::config::SessionSettings;
use agent_core::DashboardConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::session::{Message, Session, SessionState};
use crate::{Result, SessionError};

/// Channel capacity for commands
const CHANNEL_CAPACITY: usize = 64;

/// Timeouts and greeting used by the manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub connect_timeout: Duration,
    pub live_timeout: Duration,
    pub session: SessionSettings,
}

impl ManagerSettings {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            connect_timeout: config.transport.connect_timeout(),
            live_timeout: config.transport.live_timeout(),
            session: config.session.clone(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&DashboardConfig::default())
    }
}

/// Result of a successful `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Already connected to that agent; nothing changed
    AlreadyConnected,
}

enum Command {
    Connect {
        agent_id: String,
        reply: oneshot::Sender<Result<ConnectOutcome>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<ConnectOutcome>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    Transcript {
        reply: oneshot::Sender<Vec<Message>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    Agent {
        reply: oneshot::Sender<Option<AgentDescriptor>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results posted back to the actor by its own tasks
enum Internal {
    Opened {
        epoch: u64,
        result: agent_comms::Result<(Connection, EventStream)>,
    },
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    Delivered {
        epoch: u64,
        delivery: Delivery,
    },
}

/// Open connection of the active session
struct Link {
    connection: Connection,
    epoch: u64,
    forward: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.connection.close();
        self.forward.abort();
    }
}

struct ActiveSession {
    session: Session,
    /// Deliveries carry this; survives reconnects
    epoch: u64,
    correlator: Correlator,
    link: Option<Link>,
}

struct ConnectAttempt {
    epoch: u64,
    agent: AgentDescriptor,
    /// Re-open for the active session instead of starting a new one
    reconnect: bool,
    reply: oneshot::Sender<Result<ConnectOutcome>>,
    task: JoinHandle<()>,
}

struct InFlight {
    epoch: u64,
    reply: oneshot::Sender<Result<Message>>,
    task: JoinHandle<()>,
}

struct SessionActor {
    resolver: Arc<dyn AddressResolver>,
    connector: Arc<dyn Connector>,
    chain: Arc<FallbackChain>,
    discovery: Option<DiscoveryCache>,
    settings: ManagerSettings,
    ids: Arc<CorrelationIds>,

    state: SessionState,
    next_epoch: u64,
    active: Option<ActiveSession>,
    attempt: Option<ConnectAttempt>,
    in_flight: Option<InFlight>,

    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session manager started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All handles dropped, shutting down");
                        self.close_all();
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
        }

        debug!("Session manager stopped");
    }

    /// Returns `false` once the actor should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { agent_id, reply } => self.connect(agent_id, reply),
            Command::Reconnect { reply } => self.reconnect(reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send { text, reply } => self.send(text, reply),
            Command::Transcript { reply } => {
                let transcript = self
                    .active
                    .as_ref()
                    .map(|active| active.session.transcript().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(transcript);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Agent { reply } => {
                let agent = self.active.as_ref().map(|active| active.session.agent.clone());
                let _ = reply.send(agent);
            }
            Command::Shutdown { reply } => {
                self.close_all();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Opened { epoch, result } => self.opened(epoch, result),
            Internal::Transport { epoch, event } => self.transport_event(epoch, event),
            Internal::Delivered { epoch, delivery } => self.delivered(epoch, delivery),
        }
    }

    fn connect(&mut self, agent_id: String, reply: oneshot::Sender<Result<ConnectOutcome>>) {
        let current = self.active.as_ref().map(|active| active.session.agent.id.clone());
        if current.as_deref() == Some(agent_id.as_str()) {
            if self.state == SessionState::Connected {
                let _ = reply.send(Ok(ConnectOutcome::AlreadyConnected));
            } else {
                self.reconnect(reply);
            }
            return;
        }

        self.cancel_attempt();
        let switching = self.active.is_some();
        if switching {
            info!("Switching from {} to {}", current.unwrap_or_default(), agent_id);
            self.set_state(SessionState::Switching);
            self.close_session();
        }

        let address = match self.resolver.resolve(&agent_id) {
            Ok(address) => address,
            Err(e) => {
                warn!("Cannot connect to {}: {}", agent_id, e);
                self.set_state(SessionState::Idle);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        let agent = self.describe(&address);
        self.begin_attempt(address, agent, false, reply);
        self.set_state(if switching {
            SessionState::Switching
        } else {
            SessionState::Connecting
        });
    }

    fn reconnect(&mut self, reply: oneshot::Sender<Result<ConnectOutcome>>) {
        if self.state == SessionState::Connected {
            let _ = reply.send(Ok(ConnectOutcome::AlreadyConnected));
            return;
        }
        let Some(agent) = self.active.as_ref().map(|active| active.session.agent.clone()) else {
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        };

        self.cancel_attempt();
        let address = match self.resolver.resolve(&agent.id) {
            Ok(address) => address,
            Err(e) => {
                warn!("Cannot reconnect to {}: {}", agent.id, e);
                self.set_state(SessionState::Degraded);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        info!("Reconnecting to {}", agent.id);
        self.begin_attempt(address, agent, true, reply);
        self.set_state(SessionState::Connecting);
    }

    fn begin_attempt(
        &mut self,
        address: AgentAddress,
        agent: AgentDescriptor,
        reconnect: bool,
        reply: oneshot::Sender<Result<ConnectOutcome>>,
    ) {
        let epoch = self.bump_epoch();
        let connector = Arc::clone(&self.connector);
        let internal = self.internal_tx.clone();
        let connect_timeout = self.settings.connect_timeout;

        let task = tokio::spawn(async move {
            let result = match timeout(connect_timeout, connector.open(&address, connect_timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(CommsError::ConnectTimeout(connect_timeout)),
            };
            let _ = internal.send(Internal::Opened { epoch, result });
        });

        self.attempt = Some(ConnectAttempt {
            epoch,
            agent,
            reconnect,
            reply,
            task,
        });
    }

    fn opened(&mut self, epoch: u64, result: agent_comms::Result<(Connection, EventStream)>) {
        if self.attempt.as_ref().map(|attempt| attempt.epoch) != Some(epoch) {
            if let Ok((connection, _)) = result {
                debug!("Closing connection {} from an abandoned attempt", connection.id());
            }
            return;
        }
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        let agent_id = attempt.agent.id.clone();

        let (connection, events) = match result {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Connect to {} failed: {}", agent_id, e);
                self.set_state(if attempt.reconnect {
                    SessionState::Degraded
                } else {
                    SessionState::Idle
                });
                let _ = attempt.reply.send(Err(e.into()));
                return;
            }
        };

        let link = self.attach(connection, events, epoch);
        if attempt.reconnect {
            if let Some(active) = self.active.as_mut() {
                active.link = Some(link);
            }
        } else {
            let greeting = self.settings.session.greeting_for(&attempt.agent.display_name);
            let mut session = Session::new(attempt.agent);
            session.push(Message::inbound(greeting, None));
            info!("Session {} started with {}", session.id, agent_id);
            self.active = Some(ActiveSession {
                session,
                epoch,
                correlator: Correlator::new(Arc::clone(&self.ids)),
                link: Some(link),
            });
        }

        if let Some(discovery) = &self.discovery {
            discovery.pin_status(&agent_id, AgentStatus::Active);
            discovery.mark_seen(&agent_id);
        }
        self.set_state(SessionState::Connected);
        let _ = attempt.reply.send(Ok(ConnectOutcome::Connected));
    }

    fn attach(&self, connection: Connection, mut events: EventStream, epoch: u64) -> Link {
        let internal = self.internal_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal.send(Internal::Transport { epoch, event }).is_err() {
                    break;
                }
            }
        });
        Link {
            connection,
            epoch,
            forward,
        }
    }

    fn transport_event(&mut self, epoch: u64, event: TransportEvent) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.link.as_ref().map(|link| link.epoch) != Some(epoch) {
            return;
        }
        let agent_id = active.session.agent.id.clone();

        match event {
            TransportEvent::Message(message) => {
                if !active.correlator.handle_inbound(&message) && message.correlation_id.is_none() {
                    debug!("Unsolicited message from {}", agent_id);
                    active
                        .session
                        .push(Message::inbound(message.body, Some(DeliverySource::Live)));
                }
                if let Some(discovery) = &self.discovery {
                    discovery.mark_seen(&agent_id);
                }
            }
            TransportEvent::Closed { reason } => {
                warn!("Connection to {} dropped: {}", agent_id, reason);
                active.link = None;
                active.correlator.fail_all(&reason);
                if let Some(discovery) = &self.discovery {
                    discovery.pin_status(&agent_id, AgentStatus::Inactive);
                }
                self.set_state(SessionState::Degraded);
            }
        }
    }

    fn send(&mut self, text: String, reply: oneshot::Sender<Result<Message>>) {
        if self.in_flight.is_some() {
            let _ = reply.send(Err(SessionError::RequestInFlight));
            return;
        }
        // A reconnect in progress keeps the session but takes no messages
        let accepting = matches!(self.state, SessionState::Connected | SessionState::Degraded);
        let Some(active) = self.active.as_mut().filter(|_| accepting) else {
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        };

        active.session.push(Message::outbound(text.clone()));
        let agent_id = active.session.agent.id.clone();

        let live = match &active.link {
            Some(link) => {
                match active
                    .correlator
                    .request(&link.connection, &text, self.settings.live_timeout)
                {
                    Ok(pending) => Some(pending),
                    Err(e) => {
                        warn!("Live request to {} not sent: {}", agent_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        let epoch = active.epoch;
        let chain = Arc::clone(&self.chain);
        let internal = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let delivery = chain.deliver(&agent_id, &text, live).await;
            let _ = internal.send(Internal::Delivered { epoch, delivery });
        });

        self.in_flight = Some(InFlight { epoch, reply, task });
    }

    fn delivered(&mut self, epoch: u64, delivery: Delivery) {
        if self.in_flight.as_ref().map(|in_flight| in_flight.epoch) != Some(epoch) {
            debug!("Discarding reply for a closed session");
            return;
        }
        let (Some(in_flight), Some(active)) = (self.in_flight.take(), self.active.as_mut()) else {
            return;
        };

        debug!(
            "Reply for {} via {} ({} steps failed)",
            active.session.agent.id,
            delivery.source,
            delivery.failures.len()
        );
        let message = active
            .session
            .push(Message::inbound(delivery.body, Some(delivery.source)))
            .clone();
        if delivery.source == DeliverySource::Live {
            if let Some(discovery) = &self.discovery {
                discovery.mark_seen(&active.session.agent.id);
            }
        }
        let _ = in_flight.reply.send(Ok(message));
    }

    fn disconnect(&mut self) {
        if self.active.is_none() && self.attempt.is_none() {
            return;
        }
        self.set_state(SessionState::Disconnecting);
        self.cancel_attempt();
        self.close_session();
        self.set_state(SessionState::Idle);
    }

    fn close_all(&mut self) {
        self.cancel_attempt();
        self.close_session();
        self.set_state(SessionState::Idle);
    }

    /// Abandon the connect attempt in flight, if any
    fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            debug!("Abandoning connect attempt to {}", attempt.agent.id);
            attempt.task.abort();
            let _ = attempt.reply.send(Err(SessionError::Superseded));
        }
    }

    /// Release the active session: transport, pending request, transcript
    fn close_session(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            let _ = in_flight.reply.send(Err(SessionError::Superseded));
        }
        let Some(active) = self.active.take() else {
            return;
        };

        active.correlator.fail_all("session closed");
        if let Some(discovery) = &self.discovery {
            discovery.unpin(&active.session.agent.id);
        }
        info!(
            "Session {} with {} closed ({} messages)",
            active.session.id,
            active.session.agent.id,
            active.session.transcript().len()
        );
        // Dropping the link closes the connection
    }

    fn describe(&self, address: &AgentAddress) -> AgentDescriptor {
        self.discovery
            .as_ref()
            .and_then(|discovery| discovery.get(&address.id))
            .unwrap_or_else(|| AgentDescriptor {
                id: address.id.clone(),
                display_name: address.id.clone(),
                endpoint: address.ws_url().unwrap_or_else(|| "local".to_string()),
                capabilities: BTreeSet::new(),
                status: AgentStatus::Pending,
                last_seen: None,
            })
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    resolver: Arc<dyn AddressResolver>,
    connector: Arc<dyn Connector>,
    chain: Option<FallbackChain>,
    discovery: Option<DiscoveryCache>,
    settings: ManagerSettings,
}

impl SessionManagerBuilder {
    pub fn new(resolver: Arc<dyn AddressResolver>, connector: Arc<dyn Connector>) -> Self {
        Self {
            resolver,
            connector,
            chain: None,
            discovery: None,
            settings: ManagerSettings::default(),
        }
    }

    /// Everything from configuration: discovery doubles as the resolver
    pub fn from_config(config: &DashboardConfig, router: LocationRouter) -> Result<Self> {
        let discovery = DiscoveryCache::from_config(config)?;
        let chain = FallbackChain::from_config(&config.relay)?;
        Ok(Self::new(Arc::new(discovery.clone()), Arc::new(router))
            .chain(chain)
            .discovery(discovery)
            .settings(ManagerSettings::from_config(config)))
    }

    pub fn chain(mut self, chain: FallbackChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Cache whose status entries follow the active session
    pub fn discovery(mut self, discovery: DiscoveryCache) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// The cache passed to [`SessionManagerBuilder::discovery`], if any
    pub fn discovery_cache(&self) -> Option<&DiscoveryCache> {
        self.discovery.as_ref()
    }

    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start the actor; must be called inside a Tokio runtime
    pub fn spawn(self) -> SessionManager {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            resolver: self.resolver,
            connector: self.connector,
            chain: Arc::new(self.chain.unwrap_or_default()),
            discovery: self.discovery,
            settings: self.settings,
            ids: Arc::new(CorrelationIds::new()),
            state: SessionState::Idle,
            next_epoch: 0,
            active: None,
            attempt: None,
            in_flight: None,
            commands: rx,
            internal_tx,
            internal_rx,
        };
        tokio::spawn(actor.run());

        SessionManager { commands: tx }
    }
}

/// Handle to the session manager
///
/// Cheap to clone. The actor stops on [`SessionManager::shutdown`] or when
/// the last handle is dropped.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::Sender<Command>,
}

impl SessionManager {
    pub fn builder(
        resolver: Arc<dyn AddressResolver>,
        connector: Arc<dyn Connector>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder::new(resolver, connector)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        rx.await.map_err(|_| SessionError::ActorShutdown)
    }

    /// Connect to an agent, switching away from the current one if needed
    pub async fn connect(&self, agent_id: &str) -> Result<ConnectOutcome> {
        let agent_id = agent_id.to_string();
        self.call(|reply| Command::Connect { agent_id, reply }).await?
    }

    /// Re-open the transport of a degraded session, keeping its transcript
    pub async fn reconnect(&self) -> Result<ConnectOutcome> {
        self.call(|reply| Command::Reconnect { reply }).await?
    }

    /// End the session; a no-op when idle
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Command::Disconnect { reply }).await
    }

    /// Send a message and wait for its reply
    ///
    /// Resolves within the live timeout plus the relay timeout.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let text = text.to_string();
        self.call(|reply| Command::Send { text, reply }).await?
    }

    pub async fn current_transcript(&self) -> Result<Vec<Message>> {
        self.call(|reply| Command::Transcript { reply }).await
    }

    pub async fn current_state(&self) -> Result<SessionState> {
        self.call(|reply| Command::State { reply }).await
    }

    pub async fn current_agent(&self) -> Result<Option<AgentDescriptor>> {
        self.call(|reply| Command::Agent { reply }).await
    }

    /// Stop the actor and release the transport
    pub async fn shutdown(&self) -> Result<()> {
        match self.call(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(SessionError::ActorShutdown) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
