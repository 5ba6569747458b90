//! Session Management
//!
//! Holds at most one chat session with an agent and sequences connect,
//! disconnect, switch and send against it. Replies come from the fallback
//! chain in `agent-comms`, so every message gets an answer even when the
//! agent is unreachable.
//!
//! # Example
//!
//! ```no_run
//! use agent_comms::LocationRouter;
//! use agent_core::DashboardConfig;
//! use agent_session::SessionManagerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DashboardConfig::default();
//!     let manager = SessionManagerBuilder::from_config(&config, LocationRouter::default())?.spawn();
//!
//!     manager.connect("healthcare-agent").await?;
//!     let reply = manager.send_message("I have a headache").await?;
//!     println!("{} (simulated: {})", reply.body, reply.is_simulated());
//!
//!     manager.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod session;
pub mod manager;

// Re-exports
pub use error::{SessionError, Result};
pub use session::{Direction, Message, Session, SessionState};
pub use manager::{ConnectOutcome, ManagerSettings, SessionManager, SessionManagerBuilder};
