//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `telephony` - Telnyx and Twilio media-stream WebSockets

pub mod api;
pub mod telephony;

pub use api::health_check;
pub use telephony::{telnyx_handler, twilio_handler};
