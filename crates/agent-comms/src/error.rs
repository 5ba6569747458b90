//! Error types for agent communication

use std::time::Duration;

use agent_core::AgentError;

/// Result type for communication operations
pub type Result<T> = std::result::Result<T, CommsError>;

/// Errors in agent communication
#[derive(Debug, thiserror::Error)]
pub enum CommsError {
    /// No endpoint is known for the agent id
    #[error("Agent address not found: {0}")]
    AddressNotFound(String),

    /// An endpoint string could not be parsed
    #[error("Invalid agent address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Opening the connection took longer than allowed
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Transport error (refused, dropped, closed)
    #[error("Transport error: {0}")]
    Transport(String),

    /// No reply arrived before the request deadline
    #[error("No reply within {0:?}")]
    CorrelationTimeout(Duration),

    /// A request is already outstanding on this session
    #[error("A request is already in flight")]
    RequestInFlight,

    /// The relay collaborator failed
    #[error("Relay error: {0}")]
    Relay(String),

    /// The discovery collaborator failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from agent-core (configuration)
    #[error(transparent)]
    Core(#[from] AgentError),
}

impl CommsError {
    /// Create a transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a relay error
    pub fn relay<S: Into<String>>(msg: S) -> Self {
        Self::Relay(msg.into())
    }

    /// Create a discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the network rather than from the caller
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_)
                | Self::Transport(_)
                | Self::CorrelationTimeout(_)
                | Self::Relay(_)
                | Self::Discovery(_)
        )
    }
}
