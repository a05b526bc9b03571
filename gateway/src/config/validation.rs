//! Checks applied after merging.

use std::time::Duration;

use super::ServerConfig;
use crate::core::codec::UpstreamAudioFormat;
use crate::core::realtime::openai::realtime_url;
use crate::utils::url_validation::validate_webhook_url;

/// Sample rates the realtime API accepts for pcm16.
const SUPPORTED_PCM16_RATES: &[u32] = &[8000, 16000, 24000];

pub fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_bridge(config)?;
    validate_realtime(config)?;
    validate_webhooks(config)?;
    Ok(())
}

fn validate_bridge(config: &ServerConfig) -> Result<(), String> {
    let bridge = &config.bridge;
    if bridge.commit_threshold == 0 {
        return Err("bridge.commit_threshold must be at least 1".to_string());
    }
    if let UpstreamAudioFormat::Pcm16 { sample_rate } = bridge.upstream_audio_format
        && !SUPPORTED_PCM16_RATES.contains(&sample_rate)
    {
        return Err(format!(
            "Unsupported pcm16 sample rate {sample_rate}; expected one of {SUPPORTED_PCM16_RATES:?}"
        ));
    }
    for (name, value) in [
        ("drain_timeout", bridge.drain_timeout),
        ("max_call_duration", bridge.max_call_duration),
        ("start_timeout", bridge.start_timeout),
        ("connect_timeout", bridge.connect_timeout),
        ("resolve_timeout", bridge.resolve_timeout),
        ("tool_timeout", bridge.tool_timeout),
    ] {
        if value == Duration::ZERO {
            return Err(format!("bridge.{name} must be greater than zero"));
        }
    }
    if config.rate_limit_requests_per_second == 0 {
        return Err("rate_limit_requests_per_second must be at least 1".to_string());
    }
    Ok(())
}

fn validate_realtime(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    realtime_url(&config.realtime.url, &config.realtime.model)?;
    Ok(())
}

fn validate_webhooks(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    for (name, url) in [
        ("tool_webhook_url", &config.tool_webhook_url),
        ("call_record_webhook_url", &config.call_record_webhook_url),
    ] {
        if let Some(url) = url {
            validate_webhook_url(url, config.allow_local_webhooks)
                .map_err(|e| format!("Invalid {name}: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_sample_rate() {
        let mut config = ServerConfig::default();
        config.bridge.upstream_audio_format = UpstreamAudioFormat::Pcm16 { sample_rate: 44100 };
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("44100"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = ServerConfig::default();
        config.bridge.drain_timeout = Duration::ZERO;
        assert!(
            validate(&config)
                .unwrap_err()
                .to_string()
                .contains("drain_timeout")
        );
    }

    #[test]
    fn test_rejects_non_websocket_realtime_url() {
        let mut config = ServerConfig::default();
        config.realtime.url = "https://api.openai.com/v1/realtime".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_webhook_urls() {
        let mut config = ServerConfig::default();
        config.tool_webhook_url = Some("http://127.0.0.1:9000/tools".to_string());
        assert!(validate(&config).is_err());

        config.allow_local_webhooks = true;
        assert!(validate(&config).is_ok());
    }
}
