//! Provider-neutral events read from the upstream realtime session.

use serde::{Deserialize, Serialize};

use super::base::FunctionCallRequest;
use crate::core::frame::FrameDecodeError;

/// Error codes that concern a single request rather than the session.
const RECOVERABLE_CODES: &[&str] = &[
    "input_audio_buffer_commit_empty",
    "conversation_already_has_active_response",
    "response_cancel_not_active",
];

/// Invalid-request codes that still mean the session cannot continue.
const FATAL_REQUEST_CODES: &[&str] = &[
    "session_expired",
    "session_not_found",
    "invalid_api_key",
    "insufficient_quota",
    "model_not_found",
];

/// An `error` event sent by the upstream session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl UpstreamError {
    /// Whether the session can continue after this error.
    ///
    /// Request-scoped failures (a bad tool-call argument, an unknown
    /// `call_id`, committing an empty buffer) are recoverable. Server errors,
    /// authentication and quota failures, and session expiry are not.
    pub fn is_recoverable(&self) -> bool {
        let code = self.code.as_deref().unwrap_or_default();
        if RECOVERABLE_CODES.contains(&code) {
            return true;
        }
        self.error_type == "invalid_request_error" && !FATAL_REQUEST_CODES.contains(&code)
    }
}

/// Decoded upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    SessionCreated {
        session_id: String,
    },
    SessionUpdated,
    SpeechStarted {
        audio_start_ms: u64,
    },
    SpeechStopped,
    /// Base64 audio in the session's output format
    AudioDelta {
        delta: String,
        item_id: Option<String>,
        response_id: Option<String>,
    },
    AudioDone,
    UserTranscript {
        text: String,
    },
    AssistantTranscriptDelta {
        delta: String,
    },
    AssistantTranscriptDone {
        text: String,
    },
    FunctionCall(FunctionCallRequest),
    ResponseDone {
        response_id: Option<String>,
        status: Option<String>,
    },
    Error(UpstreamError),
    Unrecognized {
        event_type: String,
    },
}

impl RealtimeEvent {
    /// Decode one OpenAI Realtime server frame.
    pub fn parse(text: &str) -> Result<RealtimeEvent, FrameDecodeError> {
        super::openai::parse_server_event(text)
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &str {
        match self {
            RealtimeEvent::SessionCreated { .. } => "session.created",
            RealtimeEvent::SessionUpdated => "session.updated",
            RealtimeEvent::SpeechStarted { .. } => "speech_started",
            RealtimeEvent::SpeechStopped => "speech_stopped",
            RealtimeEvent::AudioDelta { .. } => "audio.delta",
            RealtimeEvent::AudioDone => "audio.done",
            RealtimeEvent::UserTranscript { .. } => "user_transcript",
            RealtimeEvent::AssistantTranscriptDelta { .. } => "assistant_transcript.delta",
            RealtimeEvent::AssistantTranscriptDone { .. } => "assistant_transcript.done",
            RealtimeEvent::FunctionCall(_) => "function_call",
            RealtimeEvent::ResponseDone { .. } => "response.done",
            RealtimeEvent::Error(_) => "error",
            RealtimeEvent::Unrecognized { event_type } => event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(error_type: &str, code: Option<&str>) -> UpstreamError {
        UpstreamError {
            error_type: error_type.to_string(),
            code: code.map(str::to_string),
            message: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_scoped_errors_are_recoverable() {
        assert!(error("invalid_request_error", Some("input_audio_buffer_commit_empty")).is_recoverable());
        assert!(error("invalid_request_error", Some("invalid_value")).is_recoverable());
        assert!(error("invalid_request_error", None).is_recoverable());
        assert!(error("server_error", Some("conversation_already_has_active_response")).is_recoverable());
    }

    #[test]
    fn test_session_errors_are_fatal() {
        assert!(!error("server_error", None).is_recoverable());
        assert!(!error("invalid_request_error", Some("session_expired")).is_recoverable());
        assert!(!error("invalid_request_error", Some("invalid_api_key")).is_recoverable());
        assert!(!error("authentication_error", None).is_recoverable());
        assert!(!error("rate_limit_exceeded", Some("rate_limit_exceeded")).is_recoverable());
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(RealtimeEvent::AudioDone.kind(), "audio.done");
        assert_eq!(
            RealtimeEvent::Unrecognized {
                event_type: "rate_limits.updated".to_string()
            }
            .kind(),
            "rate_limits.updated"
        );
    }
}
