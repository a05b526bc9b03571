//! Telephony media-stream WebSocket handlers.
//!
//! One handler per provider dialect. Each upgrade becomes one call: the
//! socket is split, a single writer task drains [`Outbound`] messages into
//! the sink, and the read half is handed to the bridge as an
//! [`InboundStream`](crate::bridge::InboundStream).

use axum::{
    Extension,
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{CallRequest, Outbound, TelephonySender, TelephonyTransport, TransportError};
use crate::core::telephony::TelephonyDialect;
use crate::middleware::ConnectionSlot;
use crate::state::AppState;

/// Outbound queue depth per call
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Telephony frames are small JSON envelopes; 1 MB is generous.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long the writer gets to flush the close frame after the call ends.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub struct TelephonyQuery {
    pub workspace_id: Option<String>,
}

/// `GET /ws/telephony/telnyx/{agent_id}`
pub async fn telnyx_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<TelephonyQuery>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    upgrade(ws, state, agent_id, query, TelephonyDialect::Telnyx, slot)
}

/// `GET /ws/telephony/twilio/{agent_id}`
pub async fn twilio_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<TelephonyQuery>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    upgrade(ws, state, agent_id, query, TelephonyDialect::Twilio, slot)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    agent_id: String,
    query: TelephonyQuery,
    dialect: TelephonyDialect,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    info!(
        agent_id = %agent_id,
        dialect = %dialect,
        "Telephony WebSocket upgrade requested"
    );

    let request = CallRequest {
        agent_id,
        workspace_id: query.workspace_id,
        dialect,
    };
    let slot = slot.map(|Extension(slot)| slot);

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_telephony_socket(socket, state, request, slot))
}

async fn handle_telephony_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    request: CallRequest,
    slot: Option<ConnectionSlot>,
) {
    let (mut sink, stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_BUFFER_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let (message, is_close) = match message {
                Outbound::Frame(text) => (Message::Text(text.into()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if let Err(e) = sink.send(message).await {
                debug!("Telephony socket write failed: {}", e);
                break;
            }
            if is_close {
                break;
            }
        }
    });

    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Ignoring non-UTF-8 binary telephony frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

    let transport = TelephonyTransport::new(inbound, TelephonySender::new(outbound_tx));
    let report = state.bridge.run(request, transport).await;

    match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await {
        Ok(_) => {}
        Err(_) => warn!(
            session_id = %report.session_id,
            "Telephony writer did not finish in time"
        ),
    }

    info!(
        session_id = %report.session_id,
        phase = ?report.phase(),
        duration_ms = report.duration.as_millis() as u64,
        "Telephony WebSocket closed"
    );
    drop(slot);
}
