//! Integration tests for configuration loading
//!
//! Exercise the layered loader the way the CLI uses it: a file on disk,
//! optional sections, and validation on load.

use agent_core::{
    config::{load_config, load_config_or_default, DashboardConfig},
    error::AgentError,
};
use std::io::Write;
use std::time::Duration;

fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = load_config_or_default("does-not-exist.toml");
    assert_eq!(config.agents.len(), 3);
    assert_eq!(config.transport.connect_timeout(), Duration::from_secs(5));
}

#[test]
fn test_json_config_file() {
    let file = write_config(
        ".json",
        r#"{
            "relay": { "url": "http://relay.local/generate", "timeout_ms": 750 },
            "discovery": { "url": "http://relay.local/agents", "refresh_interval_secs": 5 },
            "agents": [
                { "id": "healthcare-agent", "name": "Healthcare Assistant", "endpoint": "ws://10.0.0.4:8002" }
            ]
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.relay.timeout(), Duration::from_millis(750));
    assert_eq!(config.discovery.refresh_interval(), Duration::from_secs(5));
    assert_eq!(config.agents[0].endpoint, "ws://10.0.0.4:8002");
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let file = write_config(
        ".toml",
        r#"
[transport]
live_timeout_ms = 0
"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, AgentError::InvalidValue { .. }));
    // The lenient loader still gives a usable config
    let config = load_config_or_default(file.path());
    assert_eq!(config.transport.live_timeout_ms, 10_000);
}

#[test]
fn test_config_serialization_roundtrip() {
    let config = DashboardConfig::default();
    let json = serde_json::to_string(&config).expect("Failed to serialize");
    let deserialized: DashboardConfig = serde_json::from_str(&json).expect("Failed to deserialize");

    assert_eq!(config.agents, deserialized.agents);
    assert_eq!(config.session.greeting, deserialized.session.greeting);
}
