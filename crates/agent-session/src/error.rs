//! Error types for session management

use agent_comms::CommsError;
use agent_core::AgentError;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur during session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session is active
    #[error("Not connected to an agent")]
    NotConnected,

    /// A message is still waiting for its reply
    #[error("A message is already in flight")]
    RequestInFlight,

    /// The session or connect attempt this call belonged to was replaced
    #[error("Superseded by a newer session operation")]
    Superseded,

    /// The session manager has stopped
    #[error("Session manager has shut down")]
    ActorShutdown,

    /// Resolution, transport or discovery failure
    #[error(transparent)]
    Comms(#[from] CommsError),

    /// Generic error from agent-core
    #[error(transparent)]
    CoreError(#[from] AgentError),
}

impl SessionError {
    /// Whether the agent id has no known endpoint
    pub fn is_address_not_found(&self) -> bool {
        matches!(self, Self::Comms(CommsError::AddressNotFound(_)))
    }
}
