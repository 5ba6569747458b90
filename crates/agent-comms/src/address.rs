//! Agent addressing
//!
//! Maps logical agent ids to the endpoint a transport can dial. Resolution
//! is a pure table lookup: a missing entry ends a connect attempt and is
//! never retried through another delivery path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use agent_core::AgentEntry;

use crate::{CommsError, Result};

/// Location where an agent runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentLocation {
    /// Same process, served by the in-process transport
    Local,

    /// Network host and port, dialled as `ws://host:port`
    Network { host: String, port: u16 },

    /// Full endpoint URL, dialled verbatim
    Url { url: String },
}

impl AgentLocation {
    /// Parse an endpoint string from configuration or discovery
    ///
    /// Accepts `local`, anything with a scheme (`ws://...`, `wss://...`),
    /// or `host:port`.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(CommsError::invalid_address(endpoint, "empty endpoint"));
        }
        if endpoint.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        if endpoint.contains("://") {
            return Ok(Self::Url {
                url: endpoint.to_string(),
            });
        }

        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| CommsError::invalid_address(endpoint, "expected host:port"))?;
        if host.is_empty() {
            return Err(CommsError::invalid_address(endpoint, "missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CommsError::invalid_address(endpoint, "port is not a number"))?;

        Ok(Self::Network {
            host: host.to_string(),
            port,
        })
    }
}

/// Universal agent address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAddress {
    /// Agent identifier
    pub id: String,

    /// Where the agent runs
    pub location: AgentLocation,
}

impl AgentAddress {
    /// Create a local agent address
    pub fn local<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            location: AgentLocation::Local,
        }
    }

    /// Create a network agent address
    pub fn network<S: Into<String>>(id: S, host: S, port: u16) -> Self {
        Self {
            id: id.into(),
            location: AgentLocation::Network {
                host: host.into(),
                port,
            },
        }
    }

    /// Create an address from a full URL
    pub fn url<S: Into<String>>(id: S, url: S) -> Self {
        Self {
            id: id.into(),
            location: AgentLocation::Url { url: url.into() },
        }
    }

    /// Check if this is a local agent
    pub fn is_local(&self) -> bool {
        matches!(self.location, AgentLocation::Local)
    }

    /// WebSocket URL for remote locations
    pub fn ws_url(&self) -> Option<String> {
        match &self.location {
            AgentLocation::Local => None,
            AgentLocation::Network { host, port } => Some(format!("ws://{}:{}", host, port)),
            AgentLocation::Url { url } => Some(url.clone()),
        }
    }
}

/// Maps an agent id to its address
pub trait AddressResolver: Send + Sync {
    /// Resolve an agent id, or fail with `AddressNotFound`
    fn resolve(&self, agent_id: &str) -> Result<AgentAddress>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, AgentLocation>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the configured agent table
    ///
    /// Every endpoint is parsed up front so a bad entry fails here rather
    /// than on the first connect.
    pub fn from_entries(entries: &[AgentEntry]) -> Result<Self> {
        let mut resolver = Self::new();
        for entry in entries {
            resolver.insert(entry.id.clone(), AgentLocation::parse(&entry.endpoint)?);
        }
        Ok(resolver)
    }

    /// Builder-style insert
    pub fn with_agent<S: Into<String>>(mut self, id: S, location: AgentLocation) -> Self {
        self.insert(id, location);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, id: S, location: AgentLocation) {
        self.table.insert(id.into(), location);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, agent_id: &str) -> Result<AgentAddress> {
        self.table
            .get(agent_id)
            .map(|location| AgentAddress {
                id: agent_id.to_string(),
                location: location.clone(),
            })
            .ok_or_else(|| CommsError::AddressNotFound(agent_id.to_string()))
    }
}
