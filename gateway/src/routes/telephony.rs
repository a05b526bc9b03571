//! Telephony media-stream routes
//!
//! The provider's stream URL points at one of these, with the agent in the
//! path and an optional workspace in the query:
//!
//! ```text
//! wss://bridge.example.com/ws/telephony/telnyx/support-agent?workspace_id=ws_1
//! wss://bridge.example.com/ws/telephony/twilio/support-agent
//! ```
//!
//! The connection limit middleware is applied in `main.rs`, where the state
//! is available.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::telephony::{telnyx_handler, twilio_handler};
use crate::state::AppState;
use std::sync::Arc;

pub fn create_telephony_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/telephony/telnyx/{agent_id}", get(telnyx_handler))
        .route("/ws/telephony/twilio/{agent_id}", get(twilio_handler))
        .layer(TraceLayer::new_for_http())
}
