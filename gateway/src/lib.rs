//! Real-time audio bridge between telephony media streams (Telnyx, Twilio)
//! and OpenAI Realtime sessions.

pub mod bridge;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used items for convenience
pub use bridge::{BridgeServices, CallBridge, CallRequest, EndReason, SessionPhase, SessionReport};
pub use config::ServerConfig;
pub use errors::AppError;
pub use state::AppState;
