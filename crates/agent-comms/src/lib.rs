//! Agent Communication Layer
//!
//! Everything between a chat session and an agent: address resolution, the
//! wire envelope, live transports, request/reply correlation, and the
//! fallback chain that guarantees every message gets an answer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use agent_comms::{
//!     responder, AgentAddress, CorrelationIds, Correlator, Connector, FallbackChain,
//!     InProcessConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = InProcessConnector::new();
//!     connector.register("healthcare-agent", responder::echo());
//!
//!     let address = AgentAddress::local("healthcare-agent");
//!     let (connection, _events) = connector.open(&address, Duration::from_secs(5)).await?;
//!
//!     let correlator = Correlator::new(Arc::new(CorrelationIds::new()));
//!     let pending = correlator.request(&connection, "I have a headache", Duration::from_secs(10))?;
//!
//!     let delivery = FallbackChain::default()
//!         .deliver("healthcare-agent", "I have a headache", Some(pending))
//!         .await;
//!     println!("{} ({})", delivery.body, delivery.source);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod address;
pub mod message;
pub mod transport;
pub mod correlator;
pub mod responder;
pub mod simulator;
pub mod relay;
pub mod fallback;
pub mod discovery;

// Transports
pub mod in_process;
pub mod ws_transport;
pub mod ws_server;

// Re-exports
pub use error::{CommsError, Result};
pub use address::{AddressResolver, AgentAddress, AgentLocation, StaticResolver};
pub use message::{ContentPart, Envelope};
pub use transport::{Connection, Connector, EventStream, InboundMessage, LocationRouter, TransportEvent};
pub use correlator::{CorrelationIds, Correlator, PendingReply, PendingRequest};
pub use responder::Responder;
pub use simulator::{AgentKind, Simulator};
pub use relay::{HttpRelay, RelayClient};
pub use fallback::{Delivery, DeliverySource, FallbackChain, StepFailure, Strategy};
pub use discovery::{AgentDescriptor, AgentStatus, DiscoveryCache, DiscoverySource, HttpDiscovery};

pub use in_process::InProcessConnector;
pub use ws_transport::WsConnector;
pub use ws_server::{serve_agent, spawn_agent_server};
