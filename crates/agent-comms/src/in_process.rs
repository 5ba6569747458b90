//! In-process transport using Tokio channels
//!
//! Serves `Local` agents: each registered agent id has a [`Responder`], and
//! every connection to it gets its own pump task. Opening a connection to an
//! id with no registered responder is refused, which is how tests model an
//! unreachable live endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::transport::{connection_channels, Connection, Connector, EventStream, PumpChannels};
use crate::{AgentAddress, CommsError, Envelope, Responder, Result};

/// Out-of-band instructions for a live in-process connection
enum Control {
    Push(Envelope),
    Drop,
}

/// Control side of one live connection
struct LiveConnection {
    connection_id: String,
    control: mpsc::UnboundedSender<Control>,
}

type LiveTable = DashMap<String, Vec<LiveConnection>>;

/// In-process connector
///
/// Cheap to clone; clones share the same agent table.
#[derive(Clone, Default)]
pub struct InProcessConnector {
    /// Agent responders (agent_id -> responder)
    agents: Arc<DashMap<String, Arc<dyn Responder>>>,

    /// Control channels of live connections (agent_id -> connections)
    live: Arc<LiveTable>,
}

impl InProcessConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the responder behind an agent id
    pub fn register<S: Into<String>>(&self, agent_id: S, responder: Arc<dyn Responder>) {
        let agent_id = agent_id.into();
        tracing::debug!("Registered in-process agent: {}", agent_id);
        self.agents.insert(agent_id, responder);
    }

    /// Remove an agent; existing connections stay up until dropped
    pub fn unregister(&self, agent_id: &str) {
        self.agents.remove(agent_id);
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Number of open connections to an agent
    pub fn connection_count(&self, agent_id: &str) -> usize {
        self.live
            .get(agent_id)
            .map(|conns| conns.iter().filter(|c| !c.control.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every connection to an agent from the agent's side
    pub fn drop_connections(&self, agent_id: &str) -> usize {
        let Some((_, conns)) = self.live.remove(agent_id) else {
            return 0;
        };
        conns
            .into_iter()
            .filter(|c| c.control.send(Control::Drop).is_ok())
            .count()
    }

    /// Push an unsolicited message to every connection of an agent
    pub fn push(&self, agent_id: &str, text: &str) -> usize {
        let Some(mut conns) = self.live.get_mut(agent_id) else {
            return 0;
        };
        conns.retain(|c| !c.control.is_closed());
        let envelope = Envelope::text(uuid::Uuid::new_v4().to_string(), text);
        conns
            .iter()
            .filter(|c| c.control.send(Control::Push(envelope.clone())).is_ok())
            .count()
    }
}

/// Remove a finished connection from the live table
fn release(live: &LiveTable, agent_id: &str, connection_id: &str) {
    if let Some(mut conns) = live.get_mut(agent_id) {
        conns.retain(|c| c.connection_id != connection_id);
    }
    live.remove_if(agent_id, |_, conns| conns.is_empty());
}

async fn pump(
    mut pump: PumpChannels,
    responder: Arc<dyn Responder>,
    mut control: mpsc::UnboundedReceiver<Control>,
    live: Arc<LiveTable>,
    agent_id: String,
    connection_id: String,
) {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Envelope>();

    let reason = loop {
        tokio::select! {
            _ = &mut pump.shutdown => break "closed locally",
            request = pump.outbound.recv() => {
                let Some(request) = request else {
                    break "closed locally";
                };
                // Answer off the pump so a slow responder never stalls shutdown
                let responder = Arc::clone(&responder);
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    if let Some(text) = responder.respond(&request.body()).await {
                        let _ = reply_tx.send(Envelope::reply_to(&request, text));
                    }
                });
            }
            Some(reply) = reply_rx.recv() => pump.deliver(reply),
            instruction = control.recv() => match instruction {
                Some(Control::Push(envelope)) => pump.deliver(envelope),
                Some(Control::Drop) | None => break "connection dropped by agent",
            },
        }
    };

    drop(control);
    release(&live, &agent_id, &connection_id);
    pump.finish(reason);
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn open(
        &self,
        address: &AgentAddress,
        _connect_timeout: Duration,
    ) -> Result<(Connection, EventStream)> {
        let responder = self
            .agents
            .get(&address.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                CommsError::transport(format!("connection refused: no local agent '{}'", address.id))
            })?;

        let (connection, events, pump_channels) = connection_channels(&address.id);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.live
            .entry(address.id.clone())
            .or_default()
            .push(LiveConnection {
                connection_id: connection.id().to_string(),
                control: control_tx,
            });

        tokio::spawn(pump(
            pump_channels,
            responder,
            control_rx,
            Arc::clone(&self.live),
            address.id.clone(),
            connection.id().to_string(),
        ));
        tracing::debug!("Opened in-process connection {} to {}", connection.id(), address.id);

        Ok((connection, events))
    }

    fn name(&self) -> &str {
        "in_process"
    }
}
