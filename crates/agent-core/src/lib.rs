//! Agent Core
//!
//! Ambient pieces shared by the dashboard session layer: configuration,
//! the startup error type, and logging setup.

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{load_config, load_config_or_default, AgentEntry, DashboardConfig};
pub use error::{AgentError, Result};
pub use logging::init_logging;
