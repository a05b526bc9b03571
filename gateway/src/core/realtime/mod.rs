//! Upstream realtime speech session.
//!
//! The bridge talks to the upstream session through three pieces:
//!
//! - `RealtimeConnector` opens a connection from a `RealtimeConfig`
//! - `RealtimeSender` queues client commands (append, commit, respond)
//! - `RealtimeEvent` is the parsed, provider-neutral server event stream
//!
//! Only the OpenAI Realtime API is implemented.

mod base;
pub mod events;
pub mod openai;

pub use base::{
    FunctionCallRequest, InputTranscriptionConfig, RealtimeCommand, RealtimeConfig,
    RealtimeConnection, RealtimeConnector, RealtimeError, RealtimeResult, RealtimeSender,
    SessionSettings, ToolDefinition, TranscriptRole, TurnDetectionConfig, UpstreamCloser,
};
pub use events::{RealtimeEvent, UpstreamError};
pub use openai::{OPENAI_REALTIME_URL, OpenAIRealtimeConnector};
