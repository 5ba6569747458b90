//! Request/reply correlation over a connection
//!
//! Every request gets a process-unique correlation id, sent as the envelope
//! `messageId`. The matching reply (its `ackId`) resolves the request; so do
//! the deadline and [`Correlator::fail_all`]. Whichever comes first removes
//! the entry from the outstanding set, so a request resolves exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

use crate::{CommsError, Connection, Envelope, InboundMessage, Result};

/// Process-unique correlation ids: random token plus a counter
#[derive(Debug)]
pub struct CorrelationIds {
    token: String,
    counter: AtomicU64,
}

impl CorrelationIds {
    pub fn new() -> Self {
        let token = uuid::Uuid::new_v4().simple().to_string();
        Self {
            token: token[..12].to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.token, n)
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// An outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    pub correlation_id: String,
    pub issued_at: Instant,
    pub deadline: Instant,
    resolver: oneshot::Sender<Result<String>>,
}

type Outstanding = Arc<DashMap<String, PendingRequest>>;

/// Correlator for one session
///
/// Holds at most one outstanding request. Calls to [`Correlator::request`]
/// must come from a single owner (the session actor); matching and
/// failing may happen from anywhere.
#[derive(Debug)]
pub struct Correlator {
    ids: Arc<CorrelationIds>,
    outstanding: Outstanding,
}

impl Correlator {
    pub fn new(ids: Arc<CorrelationIds>) -> Self {
        Self {
            ids,
            outstanding: Arc::new(DashMap::new()),
        }
    }

    /// Number of unresolved requests
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Send `body` and register it for correlation
    ///
    /// Rejected with `RequestInFlight` while another request is outstanding.
    pub fn request(
        &self,
        connection: &Connection,
        body: &str,
        request_timeout: Duration,
    ) -> Result<PendingReply> {
        if !self.outstanding.is_empty() {
            return Err(CommsError::RequestInFlight);
        }

        let correlation_id = self.ids.next_id();
        let issued_at = Instant::now();
        let deadline = issued_at + request_timeout;
        let (resolver, receiver) = oneshot::channel();

        self.outstanding.insert(
            correlation_id.clone(),
            PendingRequest {
                correlation_id: correlation_id.clone(),
                issued_at,
                deadline,
                resolver,
            },
        );

        if let Err(e) = connection.send(Envelope::text(correlation_id.clone(), body)) {
            self.outstanding.remove(&correlation_id);
            return Err(e);
        }
        tracing::debug!(
            "Request {} sent to {} (timeout {:?})",
            correlation_id,
            connection.agent_id(),
            request_timeout
        );

        Ok(PendingReply {
            correlation_id,
            deadline,
            timeout: request_timeout,
            receiver,
            outstanding: Arc::clone(&self.outstanding),
        })
    }

    /// Resolve the request an inbound message answers
    ///
    /// Returns `false` for pushes and for replies nobody waits for any more.
    pub fn handle_inbound(&self, message: &InboundMessage) -> bool {
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            return false;
        };
        match self.outstanding.remove(correlation_id) {
            Some((_, pending)) => {
                tracing::debug!(
                    "Reply for {} after {:?}",
                    correlation_id,
                    pending.issued_at.elapsed()
                );
                let _ = pending.resolver.send(Ok(message.body.clone()));
                true
            }
            None => {
                tracing::debug!("Discarding late reply for {}", correlation_id);
                false
            }
        }
    }

    /// Resolve every outstanding request with a transport failure
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.outstanding.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.outstanding.remove(&id) {
                let _ = pending.resolver.send(Err(CommsError::transport(reason)));
                failed += 1;
            }
        }
        failed
    }
}

/// Caller's side of an outstanding request
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<Result<String>>,
    outstanding: Outstanding,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply body, the deadline, or a transport failure
    pub async fn wait(mut self) -> Result<String> {
        match timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommsError::transport("correlator dropped")),
            Err(_) => {
                if self.outstanding.remove(&self.correlation_id).is_some() {
                    tracing::debug!(
                        "Request {} timed out after {:?}",
                        self.correlation_id,
                        self.timeout
                    );
                    return Err(CommsError::CorrelationTimeout(self.timeout));
                }
                // Resolved between the deadline firing and the removal
                match self.receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CommsError::CorrelationTimeout(self.timeout)),
                }
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Nobody can receive the outcome any more
        self.outstanding.remove(&self.correlation_id);
    }
}
