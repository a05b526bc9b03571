//! Base traits and types for the upstream realtime session.
//!
//! A realtime connection is split into three owned parts so that the bridge
//! can hand each to the task that needs it:
//!
//! - [`RealtimeSender`] - cloneable command handle (audio, commits, responses)
//! - an `mpsc::Receiver<RealtimeEvent>` - parsed server events in arrival order
//! - [`UpstreamCloser`] - tears the socket tasks down exactly once
//!
//! Audio exchanged through these types is raw bytes in the session's
//! configured format; base64 framing is handled by the provider client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use super::events::RealtimeEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The command channel to the connection task is closed
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Connection parameters for one upstream session.
///
/// The API key is wiped from memory when the config is dropped.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,
    /// Model to use (e.g., "gpt-4o-realtime-preview")
    pub model: String,
    /// WebSocket endpoint without query string
    pub url: String,
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("url", &self.url)
            .finish()
    }
}

impl Drop for RealtimeConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// Provider-neutral session settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// Input audio format wire name (`pcm16`, `g711_ulaw`)
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format wire name
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Enable input audio transcription
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Tool definitions for function calling
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Tool choice strategy
    #[serde(default)]
    pub tool_choice: Option<String>,

    /// Temperature for response generation (0.6 to 1.2)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Response modalities (text, audio, or both)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(default)]
        threshold: Option<f32>,
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        #[serde(default)]
        silence_duration_ms: Option<u32>,
    },
    /// No automatic turn detection; the bridge's commits end each turn
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        }
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Events shared with the bridge
// =============================================================================

/// Function call request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call ID for the function call
    pub call_id: String,
    /// Function name
    pub name: String,
    /// Raw JSON arguments as sent by the model
    pub arguments: String,
    /// Item ID
    pub item_id: Option<String>,
    /// Response that produced the call
    pub response_id: Option<String>,
}

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

// =============================================================================
// Command channel
// =============================================================================

/// Commands accepted by the connection's writer task.
#[derive(Debug, Clone)]
pub enum RealtimeCommand {
    UpdateSession(Box<SessionSettings>),
    /// Raw audio in the session's input format
    AppendAudio(Bytes),
    CommitAudio,
    CreateResponse { instructions: Option<String> },
    FunctionResult { call_id: String, output: String },
}

/// Cloneable send handle for an upstream session.
///
/// Every method fails with [`RealtimeError::NotConnected`] once the writer
/// task has exited.
#[derive(Debug, Clone)]
pub struct RealtimeSender {
    tx: mpsc::Sender<RealtimeCommand>,
}

impl RealtimeSender {
    pub fn new(tx: mpsc::Sender<RealtimeCommand>) -> Self {
        Self { tx }
    }

    async fn send(&self, command: RealtimeCommand) -> RealtimeResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    pub async fn update_session(&self, settings: SessionSettings) -> RealtimeResult<()> {
        self.send(RealtimeCommand::UpdateSession(Box::new(settings)))
            .await
    }

    pub async fn append_audio(&self, audio: impl Into<Bytes>) -> RealtimeResult<()> {
        self.send(RealtimeCommand::AppendAudio(audio.into())).await
    }

    pub async fn commit_audio(&self) -> RealtimeResult<()> {
        self.send(RealtimeCommand::CommitAudio).await
    }

    /// Ask the model to respond, optionally with one-off instructions.
    pub async fn create_response(&self, instructions: Option<String>) -> RealtimeResult<()> {
        self.send(RealtimeCommand::CreateResponse { instructions })
            .await
    }

    pub async fn submit_function_result(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> RealtimeResult<()> {
        self.send(RealtimeCommand::FunctionResult {
            call_id: call_id.into(),
            output: output.into(),
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Shuts down the tasks that own an upstream socket.
///
/// Dropping the closer without calling [`UpstreamCloser::close`] still signals
/// the tasks to stop, but does not wait for them.
#[derive(Debug)]
pub struct UpstreamCloser {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl UpstreamCloser {
    pub fn new(shutdown: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { shutdown, tasks }
    }

    /// Signal shutdown and wait up to `grace` for the tasks, aborting stragglers.
    pub async fn close(mut self, grace: Duration) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        for mut task in std::mem::take(&mut self.tasks) {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!("Upstream task did not stop within grace period, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for UpstreamCloser {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A live upstream session.
pub struct RealtimeConnection {
    pub commands: RealtimeSender,
    pub events: mpsc::Receiver<RealtimeEvent>,
    pub closer: UpstreamCloser,
}

/// Opens upstream realtime sessions.
///
/// A connection is never re-established after it is lost; the bridge
/// treats that as the end of the call.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, config: &RealtimeConfig) -> RealtimeResult<RealtimeConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_role_display() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(TranscriptRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_default_turn_detection() {
        match TurnDetectionConfig::default() {
            TurnDetectionConfig::ServerVad { threshold, .. } => {
                assert_eq!(threshold, Some(0.5));
            }
            _ => panic!("Expected ServerVad default"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(RealtimeError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = RealtimeConfig {
            api_key: "sk-secret".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            url: "wss://example.com".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_sender_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(4);
        let sender = RealtimeSender::new(tx);
        sender.commit_audio().await.unwrap();
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.append_audio(vec![1u8, 2]).await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_closer_aborts_stuck_task() {
        let token = CancellationToken::new();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let child = token.clone();
        let cooperative = tokio::spawn(async move { child.cancelled().await });

        let closer = UpstreamCloser::new(token.clone(), vec![stuck, cooperative]);
        let started = std::time::Instant::now();
        closer.close(Duration::from_millis(50)).await;
        assert!(token.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
