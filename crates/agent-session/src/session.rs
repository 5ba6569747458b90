//! Session data: transcript messages, session record, manager state

use agent_comms::{AgentDescriptor, DeliverySource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a message travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// Chain step that produced an inbound reply; `None` for the greeting
    /// and for outbound messages
    pub source: Option<DeliverySource>,
}

impl Message {
    pub fn outbound<S: Into<String>>(body: S) -> Self {
        Self::new(Direction::Outbound, body.into(), None)
    }

    pub fn inbound<S: Into<String>>(body: S, source: Option<DeliverySource>) -> Self {
        Self::new(Direction::Inbound, body.into(), source)
    }

    fn new(direction: Direction, body: String, source: Option<DeliverySource>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            body,
            timestamp: Utc::now(),
            source,
        }
    }

    /// Reply came from local simulation rather than the agent
    pub fn is_simulated(&self) -> bool {
        self.source == Some(DeliverySource::Simulated)
    }
}

/// Session manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    /// The transport dropped; the transcript is kept and replies fall back
    Degraded,
    Disconnecting,
    /// Tearing down one agent's session to connect to another
    Switching,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Degraded => "degraded",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Switching => "switching",
        };
        write!(f, "{}", name)
    }
}

/// A conversation with one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent: AgentDescriptor,
    pub created_at: DateTime<Utc>,
    transcript: Vec<Message>,
}

impl Session {
    pub fn new(agent: AgentDescriptor) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent,
            created_at: Utc::now(),
            transcript: Vec::new(),
        }
    }

    /// Append to the transcript
    pub fn push(&mut self, message: Message) -> &Message {
        self.transcript.push(message);
        &self.transcript[self.transcript.len() - 1]
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_comms::AgentStatus;
    use std::collections::BTreeSet;

    fn agent() -> AgentDescriptor {
        AgentDescriptor {
            id: "healthcare-agent".into(),
            display_name: "Healthcare Assistant".into(),
            endpoint: "localhost:8002".into(),
            capabilities: BTreeSet::new(),
            status: AgentStatus::Active,
            last_seen: None,
        }
    }

    #[test]
    fn test_transcript_keeps_order() {
        let mut session = Session::new(agent());
        session.push(Message::inbound("Connected.", None));
        session.push(Message::outbound("I have a headache"));
        let reply = session.push(Message::inbound("Drink water", Some(DeliverySource::Simulated)));
        assert!(reply.is_simulated());

        let directions: Vec<Direction> = session.transcript().iter().map(|m| m.direction).collect();
        assert_eq!(
            directions,
            vec![Direction::Inbound, Direction::Outbound, Direction::Inbound]
        );
    }

    #[test]
    fn test_message_serialization() {
        let message = Message::inbound("hello", Some(DeliverySource::Relay));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["direction"], "inbound");
        assert_eq!(json["source"], "relay");
        assert!(!message.is_simulated());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Degraded.to_string(), "degraded");
        assert_eq!(SessionState::Idle.to_string(), "idle");
    }
}
