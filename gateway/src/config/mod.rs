//! Configuration module for the voice bridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use voice_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file; environment variables fill unset fields
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

use crate::core::codec::UpstreamAudioFormat;
use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL};

pub use utils::parse_bool;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Upstream realtime endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    /// Model used when the agent does not override it
    pub model: String,
    /// WebSocket endpoint without query string
    pub url: String,
    /// Model for caller speech transcription when transcripts are enabled
    pub transcription_model: String,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_REALTIME_MODEL.to_string(),
            url: OPENAI_REALTIME_URL.to_string(),
            transcription_model: "whisper-1".to_string(),
        }
    }
}

/// Per-call timing and audio settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Media chunks appended between input buffer commits (agents may override)
    pub commit_threshold: u32,
    /// Grace period for relays and upstream tasks to stop
    pub drain_timeout: Duration,
    pub max_call_duration: Duration,
    /// How long to wait for the telephony `start` frame
    pub start_timeout: Duration,
    pub connect_timeout: Duration,
    pub resolve_timeout: Duration,
    pub tool_timeout: Duration,
    /// Delay before the agent's initial greeting is requested
    pub greeting_delay: Duration,
    pub upstream_audio_format: UpstreamAudioFormat,
    /// Flush queued playback when the caller starts speaking
    pub clear_on_barge_in: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            commit_threshold: 50,
            drain_timeout: Duration::from_secs(2),
            max_call_duration: Duration::from_secs(300),
            start_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(5),
            tool_timeout: Duration::from_secs(10),
            greeting_delay: Duration::from_millis(800),
            upstream_audio_format: UpstreamAudioFormat::default(),
            clear_on_barge_in: true,
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the voice bridge, including:
/// - Server settings (host, port, TLS)
/// - OpenAI Realtime credentials and endpoint
/// - Bridge tuning (commit threshold, timeouts, upstream audio format)
/// - Collaborators (agents file, tool and call-record webhooks)
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Default OpenAI API key for agents without their own
    pub openai_api_key: Option<String>,
    pub realtime: RealtimeSettings,
    pub bridge: BridgeSettings,

    // Collaborators
    /// YAML agent catalog; without it every call is rejected as not found
    pub agents_path: Option<PathBuf>,
    pub tool_webhook_url: Option<String>,
    pub call_record_webhook_url: Option<String>,
    /// Allow http and loopback webhook targets
    pub allow_local_webhooks: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            openai_api_key: None,
            realtime: RealtimeSettings::default(),
            bridge: BridgeSettings::default(),
            agents_path: None,
            tool_webhook_url: None,
            call_record_webhook_url: None,
            allow_local_webhooks: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults).
    ///
    /// The `.env` file is loaded in `main.rs` before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}
