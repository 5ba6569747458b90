//! Session manager scenarios against in-process agents
//!
//! Agents: `healthcare-agent` answers from templates, `financial-agent`
//! echoes, `quiet-agent` never answers, and `logistics-agent` resolves but
//! refuses connections.

use agent_comms::responder::{self, TemplateResponder};
use agent_comms::*;
use agent_core::config::SessionSettings;
use agent_session::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const LIVE_TIMEOUT: Duration = Duration::from_secs(10);
const RELAY_TIMEOUT: Duration = Duration::from_secs(15);

struct FailingRelay;

#[async_trait]
impl RelayClient for FailingRelay {
    async fn generate(&self, _agent_id: &str, _prompt: &str) -> agent_comms::Result<String> {
        Err(CommsError::relay("relay returned 502 Bad Gateway"))
    }
}

/// Opens connections only after a delay
struct SlowConnector {
    inner: InProcessConnector,
    delay: Duration,
}

#[async_trait]
impl Connector for SlowConnector {
    async fn open(
        &self,
        address: &AgentAddress,
        connect_timeout: Duration,
    ) -> agent_comms::Result<(Connection, EventStream)> {
        sleep(self.delay).await;
        self.inner.open(address, connect_timeout).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

fn agents() -> InProcessConnector {
    let connector = InProcessConnector::new();
    connector.register(
        "healthcare-agent",
        Arc::new(TemplateResponder::new("healthcare-agent")),
    );
    connector.register("financial-agent", responder::echo());
    connector.register("quiet-agent", responder::silent());
    connector
}

fn resolver() -> Arc<dyn AddressResolver> {
    Arc::new(
        StaticResolver::new()
            .with_agent("healthcare-agent", AgentLocation::Local)
            .with_agent("financial-agent", AgentLocation::Local)
            .with_agent("quiet-agent", AgentLocation::Local)
            .with_agent("logistics-agent", AgentLocation::Local),
    )
}

fn settings() -> ManagerSettings {
    ManagerSettings {
        connect_timeout: Duration::from_secs(1),
        live_timeout: LIVE_TIMEOUT,
        session: SessionSettings::default(),
    }
}

fn builder(connector: Arc<dyn Connector>) -> SessionManagerBuilder {
    SessionManager::builder(resolver(), connector)
        .chain(FallbackChain::default().with_relay(Arc::new(FailingRelay), RELAY_TIMEOUT))
        .settings(settings())
}

fn manager(connector: &InProcessConnector) -> SessionManager {
    builder(Arc::new(connector.clone())).spawn()
}

async fn wait_for_transcript(manager: &SessionManager, len: usize) -> Vec<Message> {
    for _ in 0..200 {
        let transcript = manager.current_transcript().await.unwrap();
        if transcript.len() >= len {
            return transcript;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("transcript never reached {} messages", len);
}

async fn wait_for_state(manager: &SessionManager, state: SessionState) {
    for _ in 0..200 {
        if manager.current_state().await.unwrap() == state {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("state never became {}", state);
}

#[tokio::test]
async fn test_connect_then_disconnect_leaves_idle() {
    let connector = agents();
    let manager = manager(&connector);

    let outcome = manager.connect("healthcare-agent").await.unwrap();
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Connected);

    let transcript = manager.current_transcript().await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].direction, Direction::Inbound);
    assert!(transcript[0].source.is_none());
    assert_eq!(
        transcript[0].body,
        "Connected to healthcare-agent. How can I help you today?"
    );

    manager.disconnect().await.unwrap();
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Idle);
    assert!(manager.current_transcript().await.unwrap().is_empty());
    assert!(manager.current_agent().await.unwrap().is_none());

    for _ in 0..200 {
        if connector.connection_count("healthcare-agent") == 0 {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("connection was not released");
}

#[tokio::test]
async fn test_headache_scenario() {
    let manager = manager(&agents());
    manager.connect("healthcare-agent").await.unwrap();

    let reply = manager.send_message("I have a headache").await.unwrap();
    assert_eq!(reply.direction, Direction::Inbound);
    assert_eq!(reply.source, Some(DeliverySource::Live));
    assert!(!reply.is_simulated());
    assert!(reply.body.to_lowercase().contains("headache"));

    let transcript = manager.current_transcript().await.unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].direction, Direction::Outbound);
    assert_eq!(transcript[1].body, "I have a headache");
    assert_eq!(transcript[2], reply);
}

#[tokio::test]
async fn test_switch_keeps_only_new_agent() {
    let manager = manager(&agents());
    manager.connect("healthcare-agent").await.unwrap();
    manager.send_message("hello").await.unwrap();

    manager.connect("financial-agent").await.unwrap();
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Connected);
    assert_eq!(
        manager.current_agent().await.unwrap().map(|a| a.id).as_deref(),
        Some("financial-agent")
    );

    let transcript = manager.current_transcript().await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].body.contains("financial-agent"));

    let reply = manager.send_message("ping").await.unwrap();
    assert_eq!(reply.body, "echo: ping");
}

#[tokio::test]
async fn test_connect_same_agent_is_noop() {
    let manager = manager(&agents());
    manager.connect("financial-agent").await.unwrap();
    manager.send_message("one").await.unwrap();

    let outcome = manager.connect("financial-agent").await.unwrap();
    assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
    assert_eq!(manager.current_transcript().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_agent_is_address_not_found() {
    let manager = manager(&agents());

    let err = manager.connect("nonexistent-agent").await.unwrap_err();
    assert!(err.is_address_not_found());
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_refused_connection_returns_to_idle() {
    let manager = manager(&agents());

    let err = manager.connect("logistics-agent").await.unwrap_err();
    assert!(matches!(err, SessionError::Comms(CommsError::Transport(_))));
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_disconnect_when_idle_is_noop() {
    let manager = manager(&agents());
    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_send_without_session_rejected() {
    let manager = manager(&agents());
    assert!(matches!(
        manager.send_message("hello?").await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_gets_simulated_reply_in_bounded_time() {
    let manager = manager(&agents());
    manager.connect("quiet-agent").await.unwrap();

    let started = Instant::now();
    let reply = manager.send_message("I have a headache").await.unwrap();

    assert!(reply.is_simulated());
    assert_eq!(
        reply.body,
        Simulator::new().reply("quiet-agent", "I have a headache")
    );
    assert!(started.elapsed() <= LIVE_TIMEOUT + RELAY_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_second_send_is_rejected_not_queued() {
    let manager = manager(&agents());
    manager.connect("quiet-agent").await.unwrap();

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.send_message("one").await })
    };
    wait_for_transcript(&manager, 2).await;

    assert!(matches!(
        manager.send_message("two").await,
        Err(SessionError::RequestInFlight)
    ));
    assert_eq!(manager.current_transcript().await.unwrap().len(), 2);

    assert!(first.await.unwrap().unwrap().is_simulated());
    assert_eq!(manager.current_transcript().await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_switch_supersedes_waiting_send() {
    let manager = manager(&agents());
    manager.connect("quiet-agent").await.unwrap();

    let waiting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.send_message("anyone there?").await })
    };
    wait_for_transcript(&manager, 2).await;

    manager.connect("financial-agent").await.unwrap();
    assert!(matches!(
        waiting.await.unwrap(),
        Err(SessionError::Superseded)
    ));

    // Nothing from the old session leaks in later
    sleep(LIVE_TIMEOUT + RELAY_TIMEOUT).await;
    let transcript = manager.current_transcript().await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert!(transcript.iter().all(|m| m.body != "anyone there?"));
}

#[tokio::test]
async fn test_drop_degrades_then_reconnect_keeps_transcript() {
    let connector = agents();
    let manager = manager(&connector);
    manager.connect("healthcare-agent").await.unwrap();

    assert_eq!(connector.drop_connections("healthcare-agent"), 1);
    wait_for_state(&manager, SessionState::Degraded).await;

    // Live is skipped and the relay fails, so the reply is simulated
    let first = manager.send_message("I can't sleep").await.unwrap();
    let second = manager.send_message("I can't sleep").await.unwrap();
    assert!(first.is_simulated());
    assert_eq!(first.body, second.body);

    assert_eq!(manager.reconnect().await.unwrap(), ConnectOutcome::Connected);
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Connected);
    assert_eq!(manager.current_transcript().await.unwrap().len(), 5);

    let live = manager.send_message("I have a headache").await.unwrap();
    assert_eq!(live.source, Some(DeliverySource::Live));
}

#[tokio::test]
async fn test_connect_same_agent_while_degraded_reconnects() {
    let connector = agents();
    let manager = manager(&connector);
    manager.connect("financial-agent").await.unwrap();

    connector.drop_connections("financial-agent");
    wait_for_state(&manager, SessionState::Degraded).await;

    assert_eq!(
        manager.connect("financial-agent").await.unwrap(),
        ConnectOutcome::Connected
    );
    assert_eq!(manager.current_transcript().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconnect_when_idle_rejected() {
    let manager = manager(&agents());
    assert!(matches!(
        manager.reconnect().await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_unsolicited_push_is_appended() {
    let connector = agents();
    let manager = manager(&connector);
    manager.connect("financial-agent").await.unwrap();

    assert_eq!(connector.push("financial-agent", "Markets open in 5 minutes"), 1);
    let transcript = wait_for_transcript(&manager, 2).await;
    assert_eq!(transcript[1].body, "Markets open in 5 minutes");
    assert_eq!(transcript[1].source, Some(DeliverySource::Live));
}

#[tokio::test(start_paused = true)]
async fn test_newer_connect_supersedes_pending_one() {
    let connector = agents();
    let manager = builder(Arc::new(SlowConnector {
        inner: connector.clone(),
        delay: Duration::from_millis(500),
    }))
    .spawn();

    let earlier = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("healthcare-agent").await })
    };
    wait_for_state(&manager, SessionState::Connecting).await;

    manager.connect("financial-agent").await.unwrap();
    assert!(matches!(
        earlier.await.unwrap(),
        Err(SessionError::Superseded)
    ));
    assert_eq!(
        manager.current_agent().await.unwrap().map(|a| a.id).as_deref(),
        Some("financial-agent")
    );
    assert_eq!(connector.connection_count("healthcare-agent"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_rejected_while_reconnecting() {
    let connector = agents();
    let manager = builder(Arc::new(SlowConnector {
        inner: connector.clone(),
        delay: Duration::from_millis(500),
    }))
    .spawn();
    manager.connect("financial-agent").await.unwrap();

    connector.drop_connections("financial-agent");
    wait_for_state(&manager, SessionState::Degraded).await;

    let reconnecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.reconnect().await })
    };
    wait_for_state(&manager, SessionState::Connecting).await;

    assert!(matches!(
        manager.send_message("are you back?").await,
        Err(SessionError::NotConnected)
    ));
    assert_eq!(
        reconnecting.await.unwrap().unwrap(),
        ConnectOutcome::Connected
    );
    assert_eq!(manager.current_transcript().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_returns_to_idle() {
    let manager = builder(Arc::new(SlowConnector {
        inner: agents(),
        delay: Duration::from_secs(30),
    }))
    .spawn();

    let err = manager.connect("healthcare-agent").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Comms(CommsError::ConnectTimeout(_))
    ));
    assert_eq!(manager.current_state().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_discovery_status_follows_session() {
    let connector = agents();
    let discovery = DiscoveryCache::new(
        vec![AgentDescriptor {
            id: "financial-agent".into(),
            display_name: "Financial Advisor".into(),
            endpoint: "local".into(),
            capabilities: Default::default(),
            status: AgentStatus::Inactive,
            last_seen: None,
        }],
        None,
        Duration::from_secs(1),
    );
    let manager = builder(Arc::new(connector.clone()))
        .discovery(discovery.clone())
        .spawn();

    manager.connect("financial-agent").await.unwrap();
    let transcript = manager.current_transcript().await.unwrap();
    assert_eq!(
        transcript[0].body,
        "Connected to Financial Advisor. How can I help you today?"
    );

    let agent = discovery.get("financial-agent").unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert!(agent.last_seen.is_some());
    assert!(discovery.is_pinned("financial-agent"));

    manager.disconnect().await.unwrap();
    assert!(!discovery.is_pinned("financial-agent"));
}

#[tokio::test]
async fn test_shutdown_stops_manager() {
    let manager = manager(&agents());
    manager.connect("healthcare-agent").await.unwrap();

    manager.shutdown().await.unwrap();
    assert!(matches!(
        manager.current_state().await,
        Err(SessionError::ActorShutdown)
    ));
    // Shutting down twice is fine
    manager.shutdown().await.unwrap();
}
