//! OpenAI Realtime API WebSocket message types.
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - conversation.item.create - Add a function call output
//! - response.create - Generate a response
//!
//! Server events are decoded leniently: every field the bridge does not rely
//! on is optional, and unknown event types decode to `Unknown` rather than
//! failing.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::frame::FrameDecodeError;
use crate::core::realtime::base::{
    FunctionCallRequest, SessionSettings, TurnDetectionConfig,
};
use crate::core::realtime::events::{RealtimeEvent, UpstreamError};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for OpenAI Realtime API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// `None` serializes as JSON null, which disables server VAD.
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<ToolDef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        SessionConfig {
            modalities: Some(
                settings
                    .modalities
                    .clone()
                    .unwrap_or_else(|| vec!["text".to_string(), "audio".to_string()]),
            ),
            instructions: settings.instructions.clone(),
            voice: settings.voice.clone(),
            input_audio_format: settings.input_audio_format.clone(),
            output_audio_format: settings.output_audio_format.clone(),
            input_audio_transcription: settings.input_audio_transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: t.model.clone(),
                }
            }),
            turn_detection: match settings.turn_detection.clone().unwrap_or_default() {
                TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                } => Some(TurnDetection::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                }),
                TurnDetectionConfig::None => None,
            },
            tools: settings
                .tools
                .iter()
                .map(|t| ToolDef {
                    tool_type: "function".to_string(),
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
            tool_choice: settings.tool_choice.clone(),
            temperature: settings.temperature,
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
}

/// Tool definition as sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item, as sent and as received in output items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,
}

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64-encoded audio in the session's input format
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Return a tool's output to the conversation.
    pub fn function_call_output(call_id: String, output: String) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "function_call_output".to_string(),
                call_id: Some(call_id),
                output: Some(output),
                ..Default::default()
            },
        }
    }

    pub fn response_create(instructions: Option<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: instructions.map(|instructions| ResponseConfig {
                instructions: Some(instructions),
            }),
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: UpstreamError },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    /// Completed output item; carries the full function call
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: Option<String>,
        item: ConversationItem,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(other)]
    Unknown,
}

/// Decode one server frame into a [`RealtimeEvent`].
pub fn parse_server_event(text: &str) -> Result<RealtimeEvent, FrameDecodeError> {
    FrameDecodeError::check_size(text)?;

    let value: serde_json::Value = serde_json::from_str(text)?;
    let event_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(FrameDecodeError::MissingField("type"))?
        .to_string();

    let event = match serde_json::from_value::<ServerEvent>(value)? {
        ServerEvent::Error { error } => RealtimeEvent::Error(error),
        ServerEvent::SessionCreated { session } => RealtimeEvent::SessionCreated {
            session_id: session.id,
        },
        ServerEvent::SessionUpdated => RealtimeEvent::SessionUpdated,
        ServerEvent::SpeechStarted { audio_start_ms } => {
            RealtimeEvent::SpeechStarted { audio_start_ms }
        }
        ServerEvent::SpeechStopped => RealtimeEvent::SpeechStopped,
        ServerEvent::TranscriptionCompleted { transcript } => {
            RealtimeEvent::UserTranscript { text: transcript }
        }
        ServerEvent::AudioTranscriptDelta { delta } => {
            RealtimeEvent::AssistantTranscriptDelta { delta }
        }
        ServerEvent::AudioTranscriptDone { transcript } => {
            RealtimeEvent::AssistantTranscriptDone { text: transcript }
        }
        ServerEvent::AudioDelta {
            delta,
            item_id,
            response_id,
        } => RealtimeEvent::AudioDelta {
            delta,
            item_id,
            response_id,
        },
        ServerEvent::AudioDone => RealtimeEvent::AudioDone,
        ServerEvent::OutputItemDone { response_id, item } if item.item_type == "function_call" => {
            let call_id = item.call_id.ok_or(FrameDecodeError::MissingField("item.call_id"))?;
            let name = item.name.ok_or(FrameDecodeError::MissingField("item.name"))?;
            RealtimeEvent::FunctionCall(FunctionCallRequest {
                call_id,
                name,
                arguments: item.arguments.unwrap_or_else(|| "{}".to_string()),
                item_id: item.id,
                response_id,
            })
        }
        ServerEvent::OutputItemDone { .. } | ServerEvent::Unknown => {
            RealtimeEvent::Unrecognized { event_type }
        }
        ServerEvent::ResponseDone { response } => RealtimeEvent::ResponseDone {
            response_id: response.id,
            status: response.status,
        },
    };
    Ok(event)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::{InputTranscriptionConfig, ToolDefinition};

    #[test]
    fn test_commit_serialization() {
        let json = serde_json::to_string(&ClientEvent::InputAudioBufferCommit).unwrap();
        assert_eq!(json, r#"{"type":"input_audio_buffer.commit"}"#);
    }

    #[test]
    fn test_audio_append() {
        let data = vec![0u8, 1, 2, 3];
        match ClientEvent::audio_append(&data) {
            ClientEvent::InputAudioBufferAppend { audio } => {
                assert_eq!(BASE64_STANDARD.decode(&audio).unwrap(), data);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_function_call_output_serialization() {
        let event = ClientEvent::function_call_output("call_1".into(), r#"{"ok":true}"#.into());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_1");
        assert_eq!(value["item"]["output"], r#"{"ok":true}"#);
        assert!(value["item"].get("name").is_none());
    }

    #[test]
    fn test_response_create_serialization() {
        let plain = serde_json::to_value(ClientEvent::response_create(None)).unwrap();
        assert_eq!(plain, serde_json::json!({"type": "response.create"}));

        let greeting =
            serde_json::to_value(ClientEvent::response_create(Some("Say hi".into()))).unwrap();
        assert_eq!(greeting["response"]["instructions"], "Say hi");
    }

    #[test]
    fn test_session_config_from_settings() {
        let settings = SessionSettings {
            instructions: Some("Be brief".to_string()),
            voice: Some("shimmer".to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: "whisper-1".to_string(),
            }),
            tools: vec![ToolDefinition {
                name: "end_call".to_string(),
                description: Some("Hang up".to_string()),
                parameters: None,
            }],
            tool_choice: Some("auto".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(ClientEvent::SessionUpdate {
            session: SessionConfig::from(&settings),
        })
        .unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "shimmer");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["tools"][0]["type"], "function");
        assert_eq!(value["session"]["tools"][0]["name"], "end_call");
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["modalities"], serde_json::json!(["text", "audio"]));
    }

    #[test]
    fn test_disabled_turn_detection_serializes_null() {
        let settings = SessionSettings {
            turn_detection: Some(TurnDetectionConfig::None),
            ..Default::default()
        };
        let value = serde_json::to_value(SessionConfig::from(&settings)).unwrap();
        assert!(value["turn_detection"].is_null());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_parse_audio_delta() {
        let json = r#"{"type":"response.audio.delta","event_id":"e1","response_id":"r1","item_id":"i1","output_index":0,"content_index":0,"delta":"AAEC"}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            RealtimeEvent::AudioDelta {
                delta: "AAEC".to_string(),
                item_id: Some("i1".to_string()),
                response_id: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_error_event() {
        let json = r#"{"type":"error","error":{"type":"invalid_request_error","code":"input_audio_buffer_commit_empty","message":"buffer too small"}}"#;
        match parse_server_event(json).unwrap() {
            RealtimeEvent::Error(error) => {
                assert_eq!(error.error_type, "invalid_request_error");
                assert!(error.is_recoverable());
            }
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_call_item() {
        let json = r#"{
            "type": "response.output_item.done",
            "response_id": "r1",
            "output_index": 0,
            "item": {
                "id": "item_1",
                "type": "function_call",
                "status": "completed",
                "call_id": "call_1",
                "name": "end_call",
                "arguments": "{\"reason\":\"done\"}"
            }
        }"#;
        match parse_server_event(json).unwrap() {
            RealtimeEvent::FunctionCall(call) => {
                assert_eq!(call.call_id, "call_1");
                assert_eq!(call.name, "end_call");
                assert_eq!(call.arguments, r#"{"reason":"done"}"#);
                assert_eq!(call.item_id.as_deref(), Some("item_1"));
                assert_eq!(call.response_id.as_deref(), Some("r1"));
            }
            other => panic!("Expected function call, got {other:?}"),
        }
    }

    #[test]
    fn test_message_output_item_is_unrecognized() {
        let json = r#"{"type":"response.output_item.done","item":{"id":"i","type":"message","role":"assistant"}}"#;
        assert!(matches!(
            parse_server_event(json).unwrap(),
            RealtimeEvent::Unrecognized { .. }
        ));
    }

    #[test]
    fn test_parse_response_done_and_session_events() {
        let done = r#"{"type":"response.done","response":{"id":"r1","object":"realtime.response","status":"completed","output":[]}}"#;
        assert_eq!(
            parse_server_event(done).unwrap(),
            RealtimeEvent::ResponseDone {
                response_id: Some("r1".to_string()),
                status: Some("completed".to_string()),
            }
        );

        let created = r#"{"type":"session.created","session":{"id":"sess_1","model":"gpt-4o-realtime-preview"}}"#;
        assert_eq!(
            parse_server_event(created).unwrap(),
            RealtimeEvent::SessionCreated {
                session_id: "sess_1".to_string()
            }
        );

        let speech = r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120,"item_id":"i"}"#;
        assert_eq!(
            parse_server_event(speech).unwrap(),
            RealtimeEvent::SpeechStarted { audio_start_ms: 120 }
        );
    }

    #[test]
    fn test_unknown_event_type_is_not_error() {
        let json = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        assert_eq!(
            parse_server_event(json).unwrap(),
            RealtimeEvent::Unrecognized {
                event_type: "rate_limits.updated".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            parse_server_event("not json"),
            Err(FrameDecodeError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_server_event(r#"{"delta":"AA"}"#),
            Err(FrameDecodeError::MissingField("type"))
        ));
        assert!(matches!(
            parse_server_event(r#"{"type":"response.audio.delta"}"#),
            Err(FrameDecodeError::MalformedJson(_))
        ));
    }
}
