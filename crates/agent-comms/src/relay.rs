//! Relay-through-server reply source
//!
//! The relay is an HTTP service that answers a prompt on behalf of an agent
//! kind: `POST <url>` with `{prompt, agentType}` returns `{response}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::simulator::AgentKind;
use crate::{CommsError, Result};

/// A server that can answer for an agent
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn generate(&self, agent_id: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    prompt: &'a str,
    agent_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    response: String,
}

/// HTTP relay client
pub struct HttpRelay {
    client: Client,
    url: String,
}

impl HttpRelay {
    /// Client for `url`; each request is capped at `request_timeout`
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CommsError::relay(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelayClient for HttpRelay {
    async fn generate(&self, agent_id: &str, prompt: &str) -> Result<String> {
        let request = RelayRequest {
            prompt,
            agent_type: AgentKind::classify(agent_id).as_str(),
        };

        let http_response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CommsError::relay(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            return Err(CommsError::relay(format!("relay returned {}", status)));
        }

        let body: RelayResponse = http_response
            .json()
            .await
            .map_err(|e| CommsError::relay(format!("JSON parse error: {}", e)))?;

        Ok(body.response)
    }
}
