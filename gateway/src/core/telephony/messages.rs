//! Telephony media stream frames.
//!
//! Both Telnyx and Twilio send JSON text frames tagged by an `event` field.
//! The two dialects differ mostly in field naming (`stream_id` vs
//! `streamSid`, `sequence_number` vs `sequenceNumber`), so a single set of
//! lenient serde types with aliases decodes both.

use base64::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

use super::TelephonyDialect;
use crate::core::frame::FrameDecodeError;

// =============================================================================
// Wire types
// =============================================================================

/// Numeric fields arrive as strings from Twilio and as numbers from Telnyx.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Flex {
    Number(u64),
    Text(String),
}

impl Flex {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Flex::Number(n) => Some(*n),
            Flex::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum RawFrame {
    Connected,
    Start {
        #[serde(default, alias = "streamSid")]
        stream_id: Option<String>,
        #[serde(default)]
        call_control_id: Option<String>,
        #[serde(default)]
        start: Option<RawStart>,
    },
    Media {
        #[serde(default, alias = "sequenceNumber")]
        sequence_number: Option<Flex>,
        media: Option<RawMedia>,
    },
    Stop,
    Dtmf {
        #[serde(default)]
        dtmf: Option<RawDtmf>,
    },
    Mark {
        #[serde(default)]
        mark: Option<RawMark>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct RawStart {
    #[serde(default, alias = "callSid")]
    call_control_id: Option<String>,
    #[serde(default, alias = "streamSid")]
    stream_id: Option<String>,
    #[serde(default)]
    tracks: Vec<String>,
    #[serde(default, alias = "mediaFormat")]
    media_format: Option<RawMediaFormat>,
}

#[derive(Debug, Deserialize)]
struct RawMediaFormat {
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default, alias = "sampleRate")]
    sample_rate: Option<Flex>,
    #[serde(default)]
    channels: Option<Flex>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    chunk: Option<Flex>,
    #[serde(default)]
    timestamp: Option<Flex>,
    payload: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDtmf {
    #[serde(default)]
    digit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMark {
    #[serde(default)]
    name: Option<String>,
}

// =============================================================================
// Parsed events
// =============================================================================

/// Media encoding declared by the provider in the `start` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// Stream metadata carried by the `start` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    pub stream_id: String,
    /// Provider call id; falls back to the stream id when absent.
    pub call_id: String,
    pub tracks: Vec<String>,
    pub media_format: Option<MediaFormat>,
}

/// Which leg of the call a media frame belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaTrack {
    Inbound,
    Outbound,
    Unspecified,
    Other(String),
}

impl MediaTrack {
    fn from_wire(track: Option<&str>) -> Self {
        match track.map(str::to_ascii_lowercase).as_deref() {
            None | Some("") => MediaTrack::Unspecified,
            Some("inbound") | Some("inbound_track") => MediaTrack::Inbound,
            Some("outbound") | Some("outbound_track") => MediaTrack::Outbound,
            Some(other) => MediaTrack::Other(other.to_string()),
        }
    }

    /// Caller audio is forwarded upstream; the bridge's own playback is not.
    #[inline]
    pub fn is_caller_audio(&self) -> bool {
        matches!(self, MediaTrack::Inbound | MediaTrack::Unspecified)
    }
}

/// One audio chunk, already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub track: MediaTrack,
    pub sequence: Option<u64>,
    pub chunk: Option<u64>,
    pub timestamp: Option<u64>,
    pub payload: Vec<u8>,
}

/// Decoded telephony event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    Connected,
    Start(StreamStart),
    Media(MediaFrame),
    Stop,
    Dtmf { digit: Option<String> },
    Mark { name: Option<String> },
    Unrecognized { event: String },
}

impl TelephonyEvent {
    /// Decode one text frame.
    ///
    /// Unknown event names decode to [`TelephonyEvent::Unrecognized`]; only
    /// malformed JSON, a missing `event`, a `start` without a stream id, or a
    /// `media` frame with an undecodable payload are errors.
    pub fn parse(text: &str) -> Result<TelephonyEvent, FrameDecodeError> {
        FrameDecodeError::check_size(text)?;

        let value: Value = serde_json::from_str(text)?;
        let event_name = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(FrameDecodeError::MissingField("event"))?
            .to_string();

        let raw: RawFrame = serde_json::from_value(value)?;
        match raw {
            RawFrame::Connected => Ok(TelephonyEvent::Connected),
            RawFrame::Start {
                stream_id,
                call_control_id,
                start,
            } => {
                let start = start.unwrap_or_default();
                let stream_id = stream_id
                    .or(start.stream_id)
                    .filter(|s| !s.is_empty())
                    .ok_or(FrameDecodeError::MissingField("stream_id"))?;
                let call_id = start
                    .call_control_id
                    .or(call_control_id)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| stream_id.clone());
                let media_format = start.media_format.map(|f| MediaFormat {
                    encoding: f.encoding,
                    sample_rate: f.sample_rate.and_then(|v| v.as_u64()).map(|v| v as u32),
                    channels: f.channels.and_then(|v| v.as_u64()).map(|v| v as u32),
                });
                Ok(TelephonyEvent::Start(StreamStart {
                    stream_id,
                    call_id,
                    tracks: start.tracks,
                    media_format,
                }))
            }
            RawFrame::Media {
                sequence_number,
                media,
            } => {
                let media = media.ok_or(FrameDecodeError::MissingField("media"))?;
                let payload = media
                    .payload
                    .ok_or(FrameDecodeError::MissingField("media.payload"))?;
                let payload = BASE64_STANDARD.decode(payload.as_bytes())?;
                Ok(TelephonyEvent::Media(MediaFrame {
                    track: MediaTrack::from_wire(media.track.as_deref()),
                    sequence: sequence_number.and_then(|v| v.as_u64()),
                    chunk: media.chunk.and_then(|v| v.as_u64()),
                    timestamp: media.timestamp.and_then(|v| v.as_u64()),
                    payload,
                }))
            }
            RawFrame::Stop => Ok(TelephonyEvent::Stop),
            RawFrame::Dtmf { dtmf } => Ok(TelephonyEvent::Dtmf {
                digit: dtmf.and_then(|d| d.digit),
            }),
            RawFrame::Mark { mark } => Ok(TelephonyEvent::Mark {
                name: mark.and_then(|m| m.name),
            }),
            RawFrame::Unknown => Ok(TelephonyEvent::Unrecognized { event: event_name }),
        }
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &str {
        match self {
            TelephonyEvent::Connected => "connected",
            TelephonyEvent::Start(_) => "start",
            TelephonyEvent::Media(_) => "media",
            TelephonyEvent::Stop => "stop",
            TelephonyEvent::Dtmf { .. } => "dtmf",
            TelephonyEvent::Mark { .. } => "mark",
            TelephonyEvent::Unrecognized { event } => event,
        }
    }
}

// =============================================================================
// Outbound frames
// =============================================================================

/// Builders for frames sent back to the telephony provider.
pub struct OutboundFrame;

impl OutboundFrame {
    fn stream_key(dialect: TelephonyDialect) -> &'static str {
        match dialect {
            TelephonyDialect::Telnyx => "stream_id",
            TelephonyDialect::Twilio => "streamSid",
        }
    }

    /// Media frame carrying PCMU audio to be played to the caller.
    pub fn media(dialect: TelephonyDialect, stream_id: &str, pcmu: &[u8]) -> String {
        let mut frame = json!({
            "event": "media",
            "media": { "payload": BASE64_STANDARD.encode(pcmu) },
        });
        frame[Self::stream_key(dialect)] = Value::String(stream_id.to_string());
        frame.to_string()
    }

    /// Flush any audio the provider has queued for playback.
    pub fn clear(dialect: TelephonyDialect, stream_id: &str) -> String {
        let mut frame = json!({ "event": "clear" });
        frame[Self::stream_key(dialect)] = Value::String(stream_id.to_string());
        frame.to_string()
    }
}
