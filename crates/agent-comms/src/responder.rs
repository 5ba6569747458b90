//! Agent-side reply logic
//!
//! A [`Responder`] is what sits behind an endpoint: the in-process transport
//! and the demo WebSocket server both hand every inbound text to one and
//! send back whatever it returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Simulator;

/// Produces the reply to one request body
///
/// Returning `None` means the agent stays silent.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, body: &str) -> Option<String>;
}

/// Responder from a plain closure
pub struct FnResponder<F>(F);

impl<F> FnResponder<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Responder for FnResponder<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn respond(&self, body: &str) -> Option<String> {
        (self.0)(body)
    }
}

/// Replies from the simulator templates of one agent kind
pub struct TemplateResponder {
    agent_id: String,
    simulator: Simulator,
}

impl TemplateResponder {
    pub fn new<S: Into<String>>(agent_id: S) -> Self {
        Self {
            agent_id: agent_id.into(),
            simulator: Simulator::new(),
        }
    }
}

#[async_trait]
impl Responder for TemplateResponder {
    async fn respond(&self, body: &str) -> Option<String> {
        Some(self.simulator.reply(&self.agent_id, body))
    }
}

/// Waits before delegating, to model a slow agent
pub struct DelayedResponder {
    inner: Arc<dyn Responder>,
    delay: Duration,
}

impl DelayedResponder {
    pub fn new(inner: Arc<dyn Responder>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Responder for DelayedResponder {
    async fn respond(&self, body: &str) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.respond(body).await
    }
}

/// Echoes the request body back
pub fn echo() -> Arc<dyn Responder> {
    Arc::new(FnResponder::new(|body: &str| Some(format!("echo: {}", body))))
}

/// Never answers
pub fn silent() -> Arc<dyn Responder> {
    Arc::new(FnResponder::new(|_: &str| None))
}
