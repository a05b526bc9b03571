//! OpenAI Realtime API connector.
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: base64 in the negotiated format (`pcm16` or `g711_ulaw`)
//!
//! Each connection runs two tasks. The writer turns [`RealtimeCommand`]s into
//! client events; the reader parses server frames into [`RealtimeEvent`]s.
//! Both stop when the connection's shutdown token is cancelled, and the
//! writer flushes already queued commands before sending a close frame.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::config::realtime_url;
use super::messages::{ClientEvent, SessionConfig};
use crate::core::realtime::base::{
    RealtimeCommand, RealtimeConfig, RealtimeConnection, RealtimeConnector, RealtimeError,
    RealtimeResult, RealtimeSender, UpstreamCloser,
};
use crate::core::realtime::events::RealtimeEvent;

/// Channel capacity for queued client commands.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for parsed server events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opens OpenAI Realtime sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeConnector {
    connect_timeout: Duration,
}

impl OpenAIRealtimeConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn build_request(config: &RealtimeConfig) -> RealtimeResult<http::Request<()>> {
        let url = realtime_url(&config.url, &config.model)?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::InvalidConfiguration(
                    "Realtime URL has no host".to_string(),
                ));
            }
        };

        http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }
}

impl Default for OpenAIRealtimeConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtimeConnector {
    async fn connect(&self, config: &RealtimeConfig) -> RealtimeResult<RealtimeConnection> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let request = Self::build_request(config)?;
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    RealtimeError::Timeout(format!(
                        "connect did not complete within {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| match e {
                    tungstenite::Error::Http(response)
                        if response.status() == http::StatusCode::UNAUTHORIZED =>
                    {
                        RealtimeError::AuthenticationFailed("upstream rejected API key".to_string())
                    }
                    other => RealtimeError::ConnectionFailed(other.to_string()),
                })?;

        tracing::info!(model = %config.model, "Connected to OpenAI Realtime API");

        let (ws_sink, ws_stream) = ws_stream.split();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(run_writer(ws_sink, command_rx, shutdown.clone()));
        let reader = tokio::spawn(run_reader(ws_stream, event_tx, shutdown.clone()));

        Ok(RealtimeConnection {
            commands: RealtimeSender::new(command_tx),
            events: event_rx,
            closer: UpstreamCloser::new(shutdown, vec![writer, reader]),
        })
    }
}

fn to_client_event(command: RealtimeCommand) -> ClientEvent {
    match command {
        RealtimeCommand::UpdateSession(settings) => ClientEvent::SessionUpdate {
            session: SessionConfig::from(settings.as_ref()),
        },
        RealtimeCommand::AppendAudio(audio) => ClientEvent::audio_append(&audio),
        RealtimeCommand::CommitAudio => ClientEvent::InputAudioBufferCommit,
        RealtimeCommand::CreateResponse { instructions } => {
            ClientEvent::response_create(instructions)
        }
        RealtimeCommand::FunctionResult { call_id, output } => {
            ClientEvent::function_call_output(call_id, output)
        }
    }
}

async fn send_command<S>(sink: &mut S, command: RealtimeCommand) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let event = to_client_event(command);
    match serde_json::to_string(&event) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!("Failed to serialize client event: {}", e);
            Ok(())
        }
    }
}

async fn run_writer<S>(
    mut sink: S,
    mut commands: mpsc::Receiver<RealtimeCommand>,
    shutdown: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        if let Err(e) = send_command(&mut sink, command).await {
            tracing::error!("Failed to send to OpenAI Realtime: {}", e);
            shutdown.cancel();
            return;
        }
    }

    // Commands issued before shutdown still go out.
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if send_command(&mut sink, command).await.is_err() {
            break;
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!("Close frame not delivered: {}", e);
    }
    let _ = sink.close().await;
    tracing::debug!("OpenAI Realtime writer task ended");
}

async fn run_reader<St>(
    mut stream: St,
    events: mpsc::Sender<RealtimeEvent>,
    shutdown: CancellationToken,
) where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match RealtimeEvent::parse(&text) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed OpenAI Realtime frame");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "OpenAI Realtime closed the connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::error!("OpenAI Realtime WebSocket error: {}", e);
                break;
            }
            None => break,
        }
    }
    tracing::debug!("OpenAI Realtime reader task ended");
}
