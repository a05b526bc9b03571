//! Loading a complete deployment from a YAML file plus an agents file.

use std::env;
use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use voice_bridge::{
    ServerConfig,
    core::codec::UpstreamAudioFormat,
    services::{AgentResolver, ConfigAgentResolver},
    state::AppState,
};

const ENV_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "OPENAI_API_KEY",
    "OPENAI_REALTIME_MODEL",
    "BRIDGE_COMMIT_THRESHOLD",
    "BRIDGE_DRAIN_TIMEOUT_MS",
    "BRIDGE_UPSTREAM_AUDIO_FORMAT",
    "AGENTS_PATH",
    "MAX_CONNECTIONS_PER_IP",
];

fn cleanup_env_vars() {
    unsafe {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }
}

const AGENTS_YAML: &str = r#"
agents:
  - agent_id: sales
    system_prompt: You qualify inbound sales leads.
    voice: verse
    commit_threshold: 8
  - agent_id: support
    workspace_id: 6f1c2a8e-0d4b-4f7a-9a53-2f0a9d3c1b77
"#;

fn write_deployment(dir: &TempDir) -> std::path::PathBuf {
    let agents_path = dir.path().join("agents.yaml");
    fs::write(&agents_path, AGENTS_YAML).unwrap();

    let config_path = dir.path().join("config.yaml");
    let yaml = format!(
        r#"
server:
  host: "127.0.0.1"
  port: 9090

openai:
  api_key: "sk-file"
  realtime_model: "gpt-4o-realtime-preview"

bridge:
  commit_threshold: 12
  drain_timeout_ms: 750
  max_call_duration_secs: 600
  upstream_audio_format: g711_ulaw

agents:
  path: "{}"

security:
  max_connections_per_ip: 4
"#,
        agents_path.display()
    );
    fs::write(&config_path, yaml).unwrap();
    config_path
}

#[tokio::test]
#[serial]
async fn test_full_deployment_file() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let config_path = write_deployment(&dir);

    let config = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(config.address(), "127.0.0.1:9090");
    assert_eq!(config.bridge.commit_threshold, 12);
    assert_eq!(config.bridge.drain_timeout, Duration::from_millis(750));
    assert_eq!(config.bridge.max_call_duration, Duration::from_secs(600));
    assert_eq!(
        config.bridge.upstream_audio_format,
        UpstreamAudioFormat::G711Ulaw
    );
    assert_eq!(config.max_connections_per_ip, 4);

    let state = AppState::new(config).await.unwrap();
    assert_eq!(state.ws_connection_count(), 0);
}

#[tokio::test]
#[serial]
async fn test_agents_inherit_server_key() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let config_path = write_deployment(&dir);
    let config = ServerConfig::from_file(&config_path).unwrap();

    let agents_path = config.agents_path.clone().unwrap();
    let resolver = ConfigAgentResolver::from_file(&agents_path, config.openai_api_key.clone())
        .unwrap();
    assert_eq!(resolver.len(), 2);

    let sales = resolver.resolve("sales", None).await.unwrap();
    assert_eq!(sales.agent.commit_threshold, Some(8));
    assert_eq!(sales.credentials.api_key, "sk-file");
}

#[tokio::test]
#[serial]
async fn test_env_fills_gaps_in_file() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.yaml");
    fs::write(&config_path, "server:\n  port: 7000\n").unwrap();

    unsafe {
        env::set_var("PORT", "7001");
        env::set_var("OPENAI_API_KEY", "sk-env");
        env::set_var("BRIDGE_COMMIT_THRESHOLD", "3");
    }

    let config = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(config.port, 7000);
    assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
    assert_eq!(config.bridge.commit_threshold, 3);
    assert!(config.agents_path.is_none());

    cleanup_env_vars();
}

#[tokio::test]
#[serial]
async fn test_malformed_agents_file_fails_startup() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let agents_path = dir.path().join("agents.yaml");
    fs::write(&agents_path, "agents: [not, a, list, of, agents").unwrap();

    let mut config = ServerConfig::default();
    config.agents_path = Some(agents_path);
    assert!(AppState::new(config).await.is_err());
}
