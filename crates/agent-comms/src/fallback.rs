//! Ordered reply strategies
//!
//! A message is answered by the first strategy that succeeds: the live
//! transport, then the relay, then the simulator. Failures along the way are
//! logged and recorded on the [`Delivery`], never returned. The simulator
//! cannot fail, so every chain terminates with a reply.

use std::sync::Arc;
use std::time::Duration;

use agent_core::config::RelayConfig;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::relay::{HttpRelay, RelayClient};
use crate::simulator::Simulator;
use crate::{PendingReply, Result};

/// One step of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Live,
    Relay,
    Simulated,
}

/// Which step produced a reply
pub type DeliverySource = Strategy;

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Live => write!(f, "live"),
            Strategy::Relay => write!(f, "relay"),
            Strategy::Simulated => write!(f, "simulated"),
        }
    }
}

/// A step that did not produce a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub strategy: Strategy,
    pub reason: String,
}

/// Outcome of a chain run
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: String,
    pub source: DeliverySource,
    /// Steps tried before `source`, in order
    pub failures: Vec<StepFailure>,
}

impl Delivery {
    pub fn is_simulated(&self) -> bool {
        self.source == Strategy::Simulated
    }
}

/// Fallback chain shared by every session of a manager
pub struct FallbackChain {
    strategies: Vec<Strategy>,
    relay: Option<Arc<dyn RelayClient>>,
    relay_timeout: Duration,
    simulator: Simulator,
}

impl FallbackChain {
    /// Chain over `strategies`
    ///
    /// Duplicates are removed and `Simulated` is appended if missing;
    /// anything listed after `Simulated` is unreachable and dropped.
    pub fn new(strategies: impl IntoIterator<Item = Strategy>) -> Self {
        let mut ordered = Vec::new();
        for strategy in strategies {
            if !ordered.contains(&strategy) {
                ordered.push(strategy);
            }
            if strategy == Strategy::Simulated {
                break;
            }
        }
        if ordered.last() != Some(&Strategy::Simulated) {
            ordered.push(Strategy::Simulated);
        }

        Self {
            strategies: ordered,
            relay: None,
            relay_timeout: Duration::from_secs(15),
            simulator: Simulator::new(),
        }
    }

    /// Attach the relay used by the `Relay` step
    pub fn with_relay(mut self, relay: Arc<dyn RelayClient>, relay_timeout: Duration) -> Self {
        self.relay = Some(relay);
        self.relay_timeout = relay_timeout;
        self
    }

    /// Default chain with an HTTP relay if one is configured
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let chain = Self::default();
        match &config.url {
            Some(url) => {
                let relay = HttpRelay::new(url.clone(), config.timeout())?;
                Ok(chain.with_relay(Arc::new(relay), config.timeout()))
            }
            None => Ok(chain),
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Produce a reply for `body`
    ///
    /// `live` is the request already issued over the open connection, if any.
    /// It is dropped unanswered when the chain has no `Live` step.
    pub async fn deliver(
        &self,
        agent_id: &str,
        body: &str,
        mut live: Option<PendingReply>,
    ) -> Delivery {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let attempt = match strategy {
                Strategy::Live => match live.take() {
                    Some(pending) => pending.wait().await.map_err(|e| e.to_string()),
                    None => Err("no open connection".to_string()),
                },
                Strategy::Relay => self.try_relay(agent_id, body).await,
                Strategy::Simulated => {
                    tracing::debug!(
                        "Simulating reply for {} ({})",
                        agent_id,
                        Simulator::fingerprint(agent_id, body)
                    );
                    Ok(self.simulator.reply(agent_id, body))
                }
            };

            match attempt {
                Ok(reply) => {
                    return Delivery {
                        body: reply,
                        source: *strategy,
                        failures,
                    };
                }
                Err(reason) => {
                    tracing::warn!("{} step failed for {}: {}", strategy, agent_id, reason);
                    failures.push(StepFailure {
                        strategy: *strategy,
                        reason,
                    });
                }
            }
        }

        // The strategy list always ends with Simulated
        Delivery {
            body: self.simulator.reply(agent_id, body),
            source: Strategy::Simulated,
            failures,
        }
    }

    async fn try_relay(&self, agent_id: &str, body: &str) -> std::result::Result<String, String> {
        let Some(relay) = &self.relay else {
            return Err("relay not configured".to_string());
        };
        match timeout(self.relay_timeout, relay.generate(agent_id, body)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("relay timed out after {:?}", self.relay_timeout)),
        }
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new([Strategy::Live, Strategy::Relay, Strategy::Simulated])
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("strategies", &self.strategies)
            .field("relay", &self.relay.is_some())
            .field("relay_timeout", &self.relay_timeout)
            .finish()
    }
}
