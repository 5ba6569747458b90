//! Agent discovery with a static fallback
//!
//! The cache starts out holding the configured agent table. Each refresh
//! asks the discovery source for the full list and, on success, replaces the
//! cached list wholesale. A failed or timed out refresh leaves the last good
//! list in place.
//!
//! The session layer pins the status of the agent it is talking to; pinned
//! statuses survive refreshes until unpinned.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use agent_core::{AgentEntry, DashboardConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{AddressResolver, AgentAddress, AgentLocation, CommsError, Result};

/// Reported agent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Pending,
}

impl AgentStatus {
    /// Interpret a status string from the discovery source
    pub fn from_wire(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "active" | "running" | "online" => Self::Active,
            "pending" | "starting" => Self::Pending,
            _ => Self::Inactive,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Pending => write!(f, "pending"),
        }
    }
}

/// A known agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub display_name: String,
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentDescriptor {
    /// Descriptor for a configured agent
    pub fn from_entry(entry: &AgentEntry) -> Self {
        Self {
            id: entry.id.clone(),
            display_name: entry.display_name().to_string(),
            endpoint: entry.endpoint.clone(),
            capabilities: entry.capabilities.iter().cloned().collect(),
            status: AgentStatus::Active,
            last_seen: None,
        }
    }

    pub fn location(&self) -> Result<AgentLocation> {
        AgentLocation::parse(&self.endpoint)
    }
}

/// Agent record as served by the discovery endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAgent {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    last_ping: Option<DateTime<Utc>>,
}

impl WireAgent {
    /// Endpoint precedence: explicit endpoint, then port on localhost, then
    /// an address that parses as an endpoint
    fn into_descriptor(self) -> Result<AgentDescriptor> {
        let endpoint = match (self.endpoint, self.port, self.address) {
            (Some(endpoint), _, _) => endpoint,
            (None, Some(port), _) => format!("localhost:{}", port),
            (None, None, Some(address)) => address,
            (None, None, None) => {
                return Err(CommsError::discovery(format!(
                    "agent '{}' has no endpoint",
                    self.id
                )))
            }
        };
        AgentLocation::parse(&endpoint)
            .map_err(|e| CommsError::discovery(format!("agent '{}': {}", self.id, e)))?;

        Ok(AgentDescriptor {
            display_name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            endpoint,
            capabilities: self.capabilities.into_iter().collect(),
            status: self
                .status
                .as_deref()
                .map(AgentStatus::from_wire)
                .unwrap_or(AgentStatus::Inactive),
            last_seen: self.last_ping,
        })
    }
}

/// Where the agent list comes from
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<AgentDescriptor>>;
}

/// `GET <url>` returning a JSON array of agents
pub struct HttpDiscovery {
    client: Client,
    url: String,
}

impl HttpDiscovery {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscovery {
    async fn fetch(&self) -> Result<Vec<AgentDescriptor>> {
        let http_response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CommsError::discovery(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            return Err(CommsError::discovery(format!("discovery returned {}", status)));
        }

        let agents: Vec<WireAgent> = http_response
            .json()
            .await
            .map_err(|e| CommsError::discovery(format!("JSON parse error: {}", e)))?;

        agents.into_iter().map(WireAgent::into_descriptor).collect()
    }
}

struct CacheInner {
    source: Option<Arc<dyn DiscoverySource>>,
    fetch_timeout: Duration,
    agents: RwLock<Vec<AgentDescriptor>>,
    pinned: DashMap<String, AgentStatus>,
}

/// Cached agent list
///
/// Cheap to clone; clones share the same list.
#[derive(Clone)]
pub struct DiscoveryCache {
    inner: Arc<CacheInner>,
}

impl DiscoveryCache {
    /// Cache seeded with `fallback` and refreshed from `source`, if any
    pub fn new(
        fallback: Vec<AgentDescriptor>,
        source: Option<Arc<dyn DiscoverySource>>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                fetch_timeout,
                agents: RwLock::new(fallback),
                pinned: DashMap::new(),
            }),
        }
    }

    /// Cache over the configured agents and discovery endpoint
    ///
    /// Configured endpoints are checked here so a bad entry fails at startup.
    pub fn from_config(config: &DashboardConfig) -> Result<Self> {
        let fallback = config
            .agents
            .iter()
            .map(|entry| -> Result<AgentDescriptor> {
                AgentLocation::parse(&entry.endpoint)?;
                Ok(AgentDescriptor::from_entry(entry))
            })
            .collect::<Result<Vec<_>>>()?;

        let source = config
            .discovery
            .url
            .as_ref()
            .map(|url| Arc::new(HttpDiscovery::new(url.clone())) as Arc<dyn DiscoverySource>);

        Ok(Self::new(fallback, source, config.discovery.timeout()))
    }

    /// Refresh from the source and return the resulting list
    pub async fn refresh(&self) -> Vec<AgentDescriptor> {
        let Some(source) = &self.inner.source else {
            return self.agents();
        };

        match timeout(self.inner.fetch_timeout, source.fetch()).await {
            Ok(Ok(mut fresh)) => {
                let mut agents = self.write();
                // Pins are read under the lock; pin_status writes the list under it too
                for descriptor in &mut fresh {
                    if let Some(status) = self.inner.pinned.get(&descriptor.id) {
                        descriptor.status = *status;
                    }
                    // Keep last_seen marks newer than what the source reports
                    if let Some(old) = agents.iter().find(|a| a.id == descriptor.id) {
                        if old.last_seen > descriptor.last_seen {
                            descriptor.last_seen = old.last_seen;
                        }
                    }
                }
                tracing::debug!("Discovery refreshed: {} agents", fresh.len());
                *agents = fresh;
                agents.clone()
            }
            Ok(Err(e)) => {
                tracing::warn!("Discovery refresh failed, keeping last list: {}", e);
                self.agents()
            }
            Err(_) => {
                tracing::warn!(
                    "Discovery refresh timed out after {:?}, keeping last list",
                    self.inner.fetch_timeout
                );
                self.agents()
            }
        }
    }

    /// Current list
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.read().clone()
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.read().iter().find(|a| a.id == agent_id).cloned()
    }

    /// Hold an agent's status fixed across refreshes
    pub fn pin_status(&self, agent_id: &str, status: AgentStatus) {
        self.inner.pinned.insert(agent_id.to_string(), status);
        if let Some(descriptor) = self.write().iter_mut().find(|a| a.id == agent_id) {
            descriptor.status = status;
        }
    }

    /// Let refreshes update an agent's status again
    pub fn unpin(&self, agent_id: &str) {
        self.inner.pinned.remove(agent_id);
    }

    pub fn is_pinned(&self, agent_id: &str) -> bool {
        self.inner.pinned.contains_key(agent_id)
    }

    /// Record contact with an agent
    pub fn mark_seen(&self, agent_id: &str) {
        if let Some(descriptor) = self.write().iter_mut().find(|a| a.id == agent_id) {
            descriptor.last_seen = Some(Utc::now());
        }
    }

    /// Refresh every `interval` until the handle is aborted
    pub fn spawn_refresh_loop(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.refresh().await;
            }
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<AgentDescriptor>> {
        self.inner
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<AgentDescriptor>> {
        self.inner
            .agents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AddressResolver for DiscoveryCache {
    fn resolve(&self, agent_id: &str) -> Result<AgentAddress> {
        let descriptor = self
            .get(agent_id)
            .ok_or_else(|| CommsError::AddressNotFound(agent_id.to_string()))?;
        Ok(AgentAddress {
            id: descriptor.id.clone(),
            location: descriptor.location()?,
        })
    }
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCache")
            .field("agents", &self.read().len())
            .field("has_source", &self.inner.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fallback() -> Vec<AgentDescriptor> {
        DashboardConfig::default()
            .agents
            .iter()
            .map(AgentDescriptor::from_entry)
            .collect()
    }

    fn descriptor(id: &str, status: AgentStatus) -> AgentDescriptor {
        AgentDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            endpoint: "localhost:9000".to_string(),
            capabilities: BTreeSet::new(),
            status,
            last_seen: None,
        }
    }

    /// Serves a scripted sequence of outcomes, repeating the last one
    struct ScriptedSource {
        outcomes: Vec<Option<Vec<AgentDescriptor>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DiscoverySource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<AgentDescriptor>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = &self.outcomes[n.min(self.outcomes.len() - 1)];
            outcome
                .clone()
                .ok_or_else(|| CommsError::discovery("unreachable"))
        }
    }

    struct HangingSource;

    #[async_trait]
    impl DiscoverySource for HangingSource {
        async fn fetch(&self) -> Result<Vec<AgentDescriptor>> {
            std::future::pending().await
        }
    }

    /// Holds its answer until released
    struct GatedSource {
        agents: Vec<AgentDescriptor>,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl DiscoverySource for GatedSource {
        async fn fetch(&self) -> Result<Vec<AgentDescriptor>> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(self.agents.clone())
        }
    }

    fn scripted(outcomes: Vec<Option<Vec<AgentDescriptor>>>) -> Arc<dyn DiscoverySource> {
        Arc::new(ScriptedSource {
            outcomes,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_status_from_wire() {
        assert_eq!(AgentStatus::from_wire("running"), AgentStatus::Active);
        assert_eq!(AgentStatus::from_wire("PENDING"), AgentStatus::Pending);
        assert_eq!(AgentStatus::from_wire("stopped"), AgentStatus::Inactive);
    }

    #[test]
    fn test_wire_agent_endpoint_precedence() {
        let raw = r#"[
            {"id": "healthcare-agent", "name": "Healthcare Assistant", "address": "agent1qgkv", "port": 8001, "status": "running", "capabilities": ["symptom_analysis"], "lastPing": "2024-10-19T10:30:00Z"},
            {"id": "echo", "endpoint": "local"}
        ]"#;
        let wire: Vec<WireAgent> = serde_json::from_str(raw).unwrap();
        let agents: Vec<AgentDescriptor> = wire
            .into_iter()
            .map(|w| w.into_descriptor().unwrap())
            .collect();

        assert_eq!(agents[0].endpoint, "localhost:8001");
        assert_eq!(agents[0].status, AgentStatus::Active);
        assert!(agents[0].capabilities.contains("symptom_analysis"));
        assert!(agents[0].last_seen.is_some());
        assert_eq!(agents[1].display_name, "echo");
        assert_eq!(agents[1].status, AgentStatus::Inactive);
    }

    #[test]
    fn test_wire_agent_without_endpoint_rejected() {
        let wire: WireAgent = serde_json::from_str(r#"{"id": "x", "address": "agent1qgkv"}"#).unwrap();
        assert!(matches!(wire.into_descriptor(), Err(CommsError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_without_source_serves_fallback() {
        let cache = DiscoveryCache::new(fallback(), None, Duration::from_secs(1));
        let agents = cache.refresh().await;
        assert_eq!(agents.len(), 3);
        assert!(cache.get("healthcare-agent").is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_list() {
        let fresh = vec![descriptor("a", AgentStatus::Active), descriptor("b", AgentStatus::Pending)];
        let cache = DiscoveryCache::new(
            fallback(),
            Some(scripted(vec![None, Some(fresh), None])),
            Duration::from_secs(1),
        );

        // First run fails: static fallback
        assert_eq!(cache.refresh().await.len(), 3);
        // Success replaces wholesale
        let agents = cache.refresh().await;
        assert_eq!(agents.len(), 2);
        assert!(cache.get("healthcare-agent").is_none());
        // Later failure keeps the last good list
        assert_eq!(cache.refresh().await, agents);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_keeps_list() {
        let cache = DiscoveryCache::new(
            fallback(),
            Some(Arc::new(HangingSource)),
            Duration::from_secs(5),
        );
        assert_eq!(cache.refresh().await.len(), 3);
    }

    #[tokio::test]
    async fn test_pinned_status_survives_refresh() {
        let cache = DiscoveryCache::new(
            vec![descriptor("a", AgentStatus::Inactive)],
            Some(scripted(vec![Some(vec![descriptor("a", AgentStatus::Inactive)])])),
            Duration::from_secs(1),
        );

        cache.pin_status("a", AgentStatus::Active);
        cache.mark_seen("a");
        let agents = cache.refresh().await;
        assert_eq!(agents[0].status, AgentStatus::Active);
        assert!(agents[0].last_seen.is_some());

        cache.unpin("a");
        assert!(!cache.is_pinned("a"));
        assert_eq!(cache.refresh().await[0].status, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn test_pin_during_refresh_wins() {
        let source = Arc::new(GatedSource {
            agents: vec![descriptor("a", AgentStatus::Inactive)],
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = DiscoveryCache::new(
            vec![descriptor("a", AgentStatus::Inactive)],
            Some(Arc::clone(&source) as Arc<dyn DiscoverySource>),
            Duration::from_secs(5),
        );

        let refresh = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };
        source.started.notified().await;
        cache.pin_status("a", AgentStatus::Active);
        source.release.notify_one();

        let agents = refresh.await.unwrap();
        assert_eq!(agents[0].status, AgentStatus::Active);
        assert_eq!(cache.get("a").map(|a| a.status), Some(AgentStatus::Active));
    }

    #[tokio::test]
    async fn test_cache_resolves_addresses() {
        let cache = DiscoveryCache::from_config(&DashboardConfig::default()).unwrap();
        let addr = cache.resolve("financial-agent").unwrap();
        assert_eq!(addr.ws_url().as_deref(), Some("ws://localhost:8003"));
        assert!(matches!(
            cache.resolve("nonexistent-agent"),
            Err(CommsError::AddressNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_ticks() {
        let source = Arc::new(ScriptedSource {
            outcomes: vec![Some(vec![descriptor("a", AgentStatus::Active)])],
            calls: AtomicUsize::new(0),
        });
        let cache = DiscoveryCache::new(
            fallback(),
            Some(Arc::clone(&source) as Arc<dyn DiscoverySource>),
            Duration::from_secs(1),
        );

        let handle = cache.spawn_refresh_loop(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.abort();

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.agents().len(), 1);
    }

    #[tokio::test]
    async fn test_http_discovery() {
        use axum::routing::get;
        use axum::{Json, Router};
        use serde_json::json;

        let router = Router::new().route(
            "/agents",
            get(|| async {
                Json(json!([
                    {"id": "logistics-agent", "name": "Logistics Coordinator", "address": "agent1q09g", "port": 8002, "status": "running", "capabilities": ["route_optimization"], "lastPing": "2024-10-19T10:30:00Z"}
                ]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let agents = HttpDiscovery::new(format!("http://{}/agents", addr))
            .fetch()
            .await
            .unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].display_name, "Logistics Coordinator");

        let missing = HttpDiscovery::new(format!("http://{}/missing", addr)).fetch().await;
        assert!(matches!(missing, Err(CommsError::Discovery(_))));
    }
}
