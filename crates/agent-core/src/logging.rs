//! Logging setup
//!
//! Structured logging through `tracing`. `RUST_LOG` takes precedence over
//! the configured level so a single run can be turned up without editing
//! the config file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AgentError, Result};

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
///
/// # Example
///
/// ```
/// use agent_core::config::LoggingConfig;
/// use agent_core::logging::init_logging;
///
/// let config = LoggingConfig { level: "debug".to_string(), json: false };
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level);

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    installed.map_err(|e| AgentError::Logging(e.to_string()))?;

    tracing::debug!("Logging initialized at level: {}", config.level);
    Ok(())
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
