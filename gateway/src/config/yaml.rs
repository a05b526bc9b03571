use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/voice-bridge/cert.pem"
///     key_path: "/etc/voice-bridge/key.pem"
///
/// openai:
///   api_key: "sk-..."
///   realtime_model: "gpt-4o-realtime-preview"
///   realtime_url: "wss://api.openai.com/v1/realtime"
///   transcription_model: "whisper-1"
///
/// bridge:
///   commit_threshold: 50
///   drain_timeout_ms: 2000
///   max_call_duration_secs: 300
///   start_timeout_ms: 10000
///   connect_timeout_ms: 10000
///   resolve_timeout_ms: 5000
///   tool_timeout_ms: 10000
///   greeting_delay_ms: 800
///   upstream_audio_format: "pcm16"
///   upstream_sample_rate: 24000
///   clear_on_barge_in: true
///
/// agents:
///   path: "/etc/voice-bridge/agents.yaml"
///
/// webhooks:
///   tool_url: "https://hooks.example.com/tools"
///   call_record_url: "https://hooks.example.com/calls"
///   allow_local: false
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 500
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub bridge: Option<BridgeYaml>,
    pub agents: Option<AgentsYaml>,
    pub webhooks: Option<WebhooksYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// OpenAI Realtime settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub realtime_model: Option<String>,
    /// WebSocket endpoint; `?model=` is appended per call
    pub realtime_url: Option<String>,
    pub transcription_model: Option<String>,
}

/// Per-call bridge tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeYaml {
    /// Media chunks between input buffer commits
    pub commit_threshold: Option<u32>,
    pub drain_timeout_ms: Option<u64>,
    pub max_call_duration_secs: Option<u64>,
    pub start_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub resolve_timeout_ms: Option<u64>,
    pub tool_timeout_ms: Option<u64>,
    pub greeting_delay_ms: Option<u64>,
    /// "pcm16" or "g711_ulaw"
    pub upstream_audio_format: Option<String>,
    /// Only used with pcm16
    pub upstream_sample_rate: Option<u32>,
    pub clear_on_barge_in: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentsYaml {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebhooksYaml {
    pub tool_url: Option<String>,
    pub call_record_url: Option<String>,
    /// Permit http and loopback targets (development only)
    pub allow_local: Option<bool>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

openai:
  api_key: "sk-test"
  realtime_model: "gpt-4o-mini-realtime-preview"

bridge:
  commit_threshold: 25
  upstream_audio_format: "g711_ulaw"
  clear_on_barge_in: false

agents:
  path: "/etc/agents.yaml"

webhooks:
  tool_url: "https://hooks.example.com/tools"
  allow_local: true

security:
  max_connections_per_ip: 5
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("127.0.0.1".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        let openai = config.openai.as_ref().unwrap();
        assert_eq!(openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            openai.realtime_model.as_deref(),
            Some("gpt-4o-mini-realtime-preview")
        );
        let bridge = config.bridge.as_ref().unwrap();
        assert_eq!(bridge.commit_threshold, Some(25));
        assert_eq!(bridge.upstream_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(bridge.clear_on_barge_in, Some(false));
        assert_eq!(bridge.drain_timeout_ms, None);
        assert_eq!(
            config.agents.as_ref().unwrap().path.as_deref(),
            Some("/etc/agents.yaml")
        );
        assert_eq!(config.webhooks.as_ref().unwrap().allow_local, Some(true));
        assert_eq!(
            config.security.as_ref().unwrap().max_connections_per_ip,
            Some(5)
        );
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.bridge.is_none());
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
