//! Mock OpenAI Realtime server
//!
//! Speaks just enough of the realtime protocol for end-to-end bridge tests:
//! - `session.created` on connect, `session.updated` after `session.update`
//! - one `response.audio.delta` + `response.done` per committed buffer
//! - counts every client event by type

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Default)]
pub struct MockRealtimeState {
    pub connection_count: AtomicU64,
    pub closed_count: AtomicU64,
    events: Mutex<HashMap<String, u64>>,
    /// `session` objects from `session.update`, in arrival order
    pub sessions: Mutex<Vec<Value>>,
}

impl MockRealtimeState {
    pub fn count(&self, event_type: &str) -> u64 {
        self.events.lock().get(event_type).copied().unwrap_or(0)
    }

    fn record(&self, event_type: &str) {
        *self.events.lock().entry(event_type.to_string()).or_default() += 1;
    }
}

pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    pub state: Arc<MockRealtimeState>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockRealtimeState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        eprintln!("Mock realtime connection error: {e}");
                    }
                });
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }
}

/// 20 ms of 24 kHz PCM16 at a constant level.
pub fn audio_delta() -> String {
    let samples: Vec<u8> = std::iter::repeat_n(1200i16.to_le_bytes(), 480)
        .flatten()
        .collect();
    BASE64_STANDARD.encode(samples)
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockRealtimeState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let result = run_session(stream, &state).await;
    state.closed_count.fetch_add(1, Ordering::Relaxed);
    result
}

async fn run_session(
    stream: TcpStream,
    state: &MockRealtimeState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let conn_id = state.connection_count.fetch_add(1, Ordering::Relaxed) + 1;
    let created = json!({
        "type": "session.created",
        "event_id": format!("evt-{conn_id}-0"),
        "session": { "id": format!("sess-{conn_id}") }
    });
    write.send(Message::Text(created.to_string().into())).await?;

    let mut responses = 0u64;
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                eprintln!("Mock realtime read error: {e}");
                break;
            }
        };
        let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let event_type = event["type"].as_str().unwrap_or_default().to_string();
        state.record(&event_type);

        match event_type.as_str() {
            "session.update" => {
                state.sessions.lock().push(event["session"].clone());
                let updated = json!({ "type": "session.updated", "session": event["session"] });
                write.send(Message::Text(updated.to_string().into())).await?;
            }
            "input_audio_buffer.commit" => {
                responses += 1;
                let response_id = format!("resp-{conn_id}-{responses}");
                let delta = json!({
                    "type": "response.audio.delta",
                    "response_id": response_id,
                    "item_id": format!("item-{responses}"),
                    "output_index": 0,
                    "content_index": 0,
                    "delta": audio_delta(),
                });
                let done = json!({
                    "type": "response.done",
                    "response": { "id": response_id, "status": "completed" }
                });
                write.send(Message::Text(delta.to_string().into())).await?;
                write.send(Message::Text(done.to_string().into())).await?;
            }
            _ => {}
        }
    }

    Ok(())
}
