//! Configuration management for the dashboard session layer
//!
//! Configuration is layered from:
//! - Default values (a usable local setup with three demo agents)
//! - A configuration file (TOML, JSON, YAML)
//! - Environment variables prefixed with `AGENT__`

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the session layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Live transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Server-side relay used when the live transport cannot answer
    #[serde(default)]
    pub relay: RelayConfig,

    /// Agent discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionSettings,

    /// Static agent table: address book and discovery fallback
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentEntry>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

/// Live transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How long opening a connection may take
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a correlated request waits for its reply
    #[serde(default = "default_live_timeout_ms")]
    pub live_timeout_ms: u64,
}

/// Relay collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay endpoint; the relay step is skipped when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

/// Discovery collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Agent list endpoint; only the static list is served when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,

    /// Period of the background refresh
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// Session behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Greeting appended when a session connects; `{agent}` is replaced
    /// with the agent's display name
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

/// One entry of the static agent table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Logical agent id
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Endpoint: `local`, `host:port` or a full `ws://` URL
    pub endpoint: String,

    /// Advertised capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentEntry {
    /// Create an entry with no name or capabilities
    pub fn new<S: Into<String>>(id: S, endpoint: S) -> Self {
        Self {
            id: id.into(),
            name: None,
            endpoint: endpoint.into(),
            capabilities: Vec::new(),
        }
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_live_timeout_ms() -> u64 {
    10_000
}

fn default_relay_timeout_ms() -> u64 {
    15_000
}

fn default_discovery_timeout_ms() -> u64 {
    5_000
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_greeting() -> String {
    "Connected to {agent}. How can I help you today?".to_string()
}

fn default_agents() -> Vec<AgentEntry> {
    vec![
        AgentEntry {
            id: "healthcare-agent".to_string(),
            name: Some("Healthcare Assistant".to_string()),
            endpoint: "localhost:8002".to_string(),
            capabilities: vec![
                "Medical Analysis".to_string(),
                "Symptom Checker".to_string(),
                "Treatment Planning".to_string(),
            ],
        },
        AgentEntry {
            id: "financial-agent".to_string(),
            name: Some("Financial Advisor".to_string()),
            endpoint: "localhost:8003".to_string(),
            capabilities: vec![
                "Portfolio Management".to_string(),
                "Risk Assessment".to_string(),
                "DeFi Integration".to_string(),
            ],
        },
        AgentEntry {
            id: "logistics-agent".to_string(),
            name: Some("Logistics Coordinator".to_string()),
            endpoint: "localhost:8004".to_string(),
            capabilities: vec![
                "Route Optimization".to_string(),
                "Inventory Management".to_string(),
                "Supply Chain Analysis".to_string(),
            ],
        },
    ]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            live_timeout_ms: default_live_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_relay_timeout_ms(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_discovery_timeout_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
        }
    }
}

impl SessionSettings {
    /// Render the greeting for an agent
    pub fn greeting_for(&self, agent_name: &str) -> String {
        self.greeting.replace("{agent}", agent_name)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            transport: TransportConfig::default(),
            relay: RelayConfig::default(),
            discovery: DiscoveryConfig::default(),
            session: SessionSettings::default(),
            agents: default_agents(),
        }
    }
}

impl DashboardConfig {
    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("transport.connect_timeout_ms", self.transport.connect_timeout_ms),
            ("transport.live_timeout_ms", self.transport.live_timeout_ms),
            ("relay.timeout_ms", self.relay.timeout_ms),
            ("discovery.timeout_ms", self.discovery.timeout_ms),
            ("discovery.refresh_interval_secs", self.discovery.refresh_interval_secs),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(AgentError::invalid_value(field, "must be greater than zero"));
            }
        }

        let mut seen = HashSet::new();
        for entry in &self.agents {
            if entry.id.trim().is_empty() {
                return Err(AgentError::invalid_value("agents.id", "must not be empty"));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(AgentError::invalid_value(
                    "agents.id",
                    format!("duplicate agent id '{}'", entry.id),
                ));
            }
        }

        Ok(())
    }

    /// Look up a static agent entry by id
    pub fn agent(&self, id: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|entry| entry.id == id)
    }
}

/// Load configuration from a file
///
/// Supports TOML, JSON, and YAML formats based on file extension.
/// Environment variables such as `AGENT__RELAY__URL` override file values.
///
/// # Example
///
/// ```no_run
/// use agent_core::config::load_config;
///
/// let config = load_config("dashboard.toml").unwrap();
/// println!("Live timeout: {:?}", config.transport.live_timeout());
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DashboardConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(AgentError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("AGENT").separator("__"))
        .build()?;

    let config: DashboardConfig = settings.try_deserialize()?;
    config.validate()?;

    tracing::info!("Configuration loaded from {}", path.display());

    Ok(config)
}

/// Load configuration with defaults if the file is missing or unusable
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> DashboardConfig {
    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            DashboardConfig::default()
        }
    }
}
