//! OpenAI Realtime API provider.
//!
//! Supported voices: alloy, ash, ballad, coral, echo, sage, shimmer, verse.
//!
//! Audio is PCM 16-bit signed little-endian at 24 kHz by default. G.711
//! mu-law at 8 kHz is also accepted, which lets telephony audio pass through
//! without transcoding.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtimeConnector;
pub use config::{DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeVoice, realtime_url};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, parse_server_event};
