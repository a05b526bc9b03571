//! Merge YAML values over environment variables over defaults.

use std::path::PathBuf;
use std::time::Duration;

use super::env::{env_bool, env_parse, env_string};
use super::utils::non_empty;
use super::yaml::YamlConfig;
use super::{BridgeSettings, RealtimeSettings, ServerConfig, TlsConfig};
use crate::core::codec::UpstreamAudioFormat;

/// YAML value if present, otherwise the environment variable.
macro_rules! get_optional {
    ($yaml:expr, $env:expr) => {
        match $yaml {
            Some(value) => Some(value),
            None => $env?,
        }
    };
}

/// Like `get_optional!`, falling back to a default.
macro_rules! get_value {
    ($yaml:expr, $env:expr, $default:expr) => {
        get_optional!($yaml, $env).unwrap_or($default)
    };
}

fn env_text(name: &str) -> Result<Option<String>, String> {
    Ok(env_string(name))
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let tls = server.tls.unwrap_or_default();
    let openai = yaml.openai.unwrap_or_default();
    let bridge = yaml.bridge.unwrap_or_default();
    let agents = yaml.agents.unwrap_or_default();
    let webhooks = yaml.webhooks.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let defaults = ServerConfig::default();
    let realtime_defaults = RealtimeSettings::default();
    let bridge_defaults = BridgeSettings::default();

    // Server
    let host = get_value!(
        non_empty(server.host),
        env_text("HOST"),
        defaults.host.clone()
    );
    let port = get_value!(server.port, env_parse::<u16>("PORT"), defaults.port);

    let tls_enabled = get_value!(tls.enabled, env_bool("TLS_ENABLED"), false);
    let tls = if tls_enabled {
        let cert_path = get_optional!(
            non_empty(tls.cert_path),
            env_text("TLS_CERT_PATH")
        )
        .ok_or("TLS is enabled but no certificate path is configured")?;
        let key_path = get_optional!(
            non_empty(tls.key_path),
            env_text("TLS_KEY_PATH")
        )
        .ok_or("TLS is enabled but no private key path is configured")?;
        Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    } else {
        None
    };

    // OpenAI
    let openai_api_key = get_optional!(
        non_empty(openai.api_key),
        env_text("OPENAI_API_KEY")
    );
    let realtime = RealtimeSettings {
        model: get_value!(
            non_empty(openai.realtime_model),
            env_text("OPENAI_REALTIME_MODEL"),
            realtime_defaults.model
        ),
        url: get_value!(
            non_empty(openai.realtime_url),
            env_text("OPENAI_REALTIME_URL"),
            realtime_defaults.url
        ),
        transcription_model: get_value!(
            non_empty(openai.transcription_model),
            env_text("OPENAI_TRANSCRIPTION_MODEL"),
            realtime_defaults.transcription_model
        ),
    };

    // Bridge
    let format_name = get_optional!(
        non_empty(bridge.upstream_audio_format),
        env_text("BRIDGE_UPSTREAM_AUDIO_FORMAT")
    );
    let sample_rate = get_optional!(
        bridge.upstream_sample_rate,
        env_parse::<u32>("BRIDGE_UPSTREAM_SAMPLE_RATE")
    );
    let upstream_audio_format = match format_name {
        Some(name) => UpstreamAudioFormat::parse(&name, sample_rate)
            .ok_or_else(|| format!("Unsupported upstream audio format: {name}"))?,
        None => match sample_rate {
            Some(sample_rate) => UpstreamAudioFormat::Pcm16 { sample_rate },
            None => bridge_defaults.upstream_audio_format,
        },
    };

    let bridge = BridgeSettings {
        commit_threshold: get_value!(
            bridge.commit_threshold,
            env_parse::<u32>("BRIDGE_COMMIT_THRESHOLD"),
            bridge_defaults.commit_threshold
        ),
        drain_timeout: get_optional!(
            bridge.drain_timeout_ms,
            env_parse::<u64>("BRIDGE_DRAIN_TIMEOUT_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.drain_timeout),
        max_call_duration: get_optional!(
            bridge.max_call_duration_secs,
            env_parse::<u64>("BRIDGE_MAX_CALL_DURATION_SECS")
        )
        .map(Duration::from_secs)
        .unwrap_or(bridge_defaults.max_call_duration),
        start_timeout: get_optional!(
            bridge.start_timeout_ms,
            env_parse::<u64>("BRIDGE_START_TIMEOUT_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.start_timeout),
        connect_timeout: get_optional!(
            bridge.connect_timeout_ms,
            env_parse::<u64>("BRIDGE_CONNECT_TIMEOUT_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.connect_timeout),
        resolve_timeout: get_optional!(
            bridge.resolve_timeout_ms,
            env_parse::<u64>("BRIDGE_RESOLVE_TIMEOUT_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.resolve_timeout),
        tool_timeout: get_optional!(
            bridge.tool_timeout_ms,
            env_parse::<u64>("BRIDGE_TOOL_TIMEOUT_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.tool_timeout),
        greeting_delay: get_optional!(
            bridge.greeting_delay_ms,
            env_parse::<u64>("BRIDGE_GREETING_DELAY_MS")
        )
        .map(millis)
        .unwrap_or(bridge_defaults.greeting_delay),
        upstream_audio_format,
        clear_on_barge_in: get_value!(
            bridge.clear_on_barge_in,
            env_bool("BRIDGE_CLEAR_ON_BARGE_IN"),
            bridge_defaults.clear_on_barge_in
        ),
    };

    // Collaborators
    let agents_path = get_optional!(
        non_empty(agents.path),
        env_text("AGENTS_PATH")
    )
    .map(PathBuf::from);
    let tool_webhook_url = get_optional!(
        non_empty(webhooks.tool_url),
        env_text("TOOL_WEBHOOK_URL")
    );
    let call_record_webhook_url = get_optional!(
        non_empty(webhooks.call_record_url),
        env_text("CALL_RECORD_WEBHOOK_URL")
    );
    let allow_local_webhooks = get_value!(
        webhooks.allow_local,
        env_bool("ALLOW_LOCAL_WEBHOOKS"),
        defaults.allow_local_webhooks
    );

    // Security
    let cors_allowed_origins = get_optional!(
        non_empty(security.cors_allowed_origins),
        env_text("CORS_ALLOWED_ORIGINS")
    );
    let rate_limit_requests_per_second = get_value!(
        security.rate_limit_requests_per_second,
        env_parse::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND"),
        defaults.rate_limit_requests_per_second
    );
    let rate_limit_burst_size = get_value!(
        security.rate_limit_burst_size,
        env_parse::<u32>("RATE_LIMIT_BURST_SIZE"),
        defaults.rate_limit_burst_size
    );
    let max_websocket_connections = get_optional!(
        security.max_websocket_connections,
        env_parse::<usize>("MAX_WEBSOCKET_CONNECTIONS")
    );
    let max_connections_per_ip = get_value!(
        security.max_connections_per_ip,
        env_parse::<u32>("MAX_CONNECTIONS_PER_IP"),
        defaults.max_connections_per_ip
    );

    Ok(ServerConfig {
        host,
        port,
        tls,
        openai_api_key,
        realtime,
        bridge,
        agents_path,
        tool_webhook_url,
        call_record_webhook_url,
        allow_local_webhooks,
        cors_allowed_origins,
        rate_limit_requests_per_second,
        rate_limit_burst_size,
        max_websocket_connections,
        max_connections_per_ip,
    })
}
