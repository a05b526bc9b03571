//! Caller audio from telephony to the upstream session.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::SessionContext;
use super::transport::{InboundStream, TransportError};
use super::{EndReason, IngressStats};
use crate::core::codec::AudioPipeline;
use crate::core::telephony::{MediaFrame, TelephonyEvent};

/// Upper bound on the best-effort commit sent when the relay is cancelled.
const FINAL_COMMIT_TIMEOUT: Duration = Duration::from_millis(250);

enum IngressInput {
    Cancelled,
    Greeting,
    Frame(Option<Result<String, TransportError>>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Logs the first few occurrences, then every twentieth.
#[derive(Debug, Default)]
struct LogThrottle {
    seen: u64,
}

impl LogThrottle {
    fn should_log(&mut self) -> bool {
        self.seen += 1;
        self.seen <= 5 || self.seen % 20 == 0
    }
}

pub(super) struct IngressRelay {
    ctx: Arc<SessionContext>,
    inbound: InboundStream,
    pipeline: AudioPipeline,
    greeting: Option<(String, Instant)>,
    stats: IngressStats,
    media_log: LogThrottle,
}

impl IngressRelay {
    pub(super) fn new(
        ctx: Arc<SessionContext>,
        inbound: InboundStream,
        pipeline: AudioPipeline,
        greeting_delay: Duration,
    ) -> Self {
        let greeting = ctx
            .agent()
            .initial_greeting
            .clone()
            .filter(|g| !g.trim().is_empty())
            .map(|g| (g, Instant::now() + greeting_delay));
        Self {
            ctx,
            inbound,
            pipeline,
            greeting,
            stats: IngressStats::default(),
            media_log: LogThrottle::default(),
        }
    }

    pub(super) async fn run(mut self) -> IngressStats {
        let cancel = self.ctx.cancellation();

        loop {
            let greeting_at = self.greeting.as_ref().map(|(_, at)| *at);
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => IngressInput::Cancelled,
                _ = tokio::time::sleep_until(greeting_at.unwrap_or_else(Instant::now)), if greeting_at.is_some() => {
                    IngressInput::Greeting
                }
                frame = self.inbound.next() => IngressInput::Frame(frame),
            };

            let flow = match input {
                IngressInput::Cancelled => Flow::Stop,
                IngressInput::Greeting => self.send_greeting().await,
                IngressInput::Frame(Some(Ok(text))) => self.handle_frame(&text).await,
                IngressInput::Frame(Some(Err(e))) => {
                    warn!(call_id = %self.ctx.call_id(), error = %e, "Telephony receive failed");
                    self.ctx.terminate(EndReason::TelephonyError);
                    Flow::Stop
                }
                IngressInput::Frame(None) => {
                    debug!(call_id = %self.ctx.call_id(), "Telephony stream closed");
                    self.ctx.terminate(EndReason::TelephonyClosed);
                    Flow::Stop
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        if !self.stats.forced_commit {
            let commit = self.ctx.commands().commit_audio();
            if let Ok(Ok(())) = tokio::time::timeout(FINAL_COMMIT_TIMEOUT, commit).await {
                self.stats.forced_commit = true;
                self.ctx.reset_chunks();
            }
        }

        debug!(
            call_id = %self.ctx.call_id(),
            forwarded = self.stats.frames_forwarded,
            dropped = self.stats.frames_dropped,
            commits = self.stats.threshold_commits,
            "Ingress relay stopped"
        );
        self.stats
    }

    async fn send_greeting(&mut self) -> Flow {
        let Some((greeting, _)) = self.greeting.take() else {
            return Flow::Continue;
        };
        debug!(call_id = %self.ctx.call_id(), "Requesting initial greeting");
        if let Err(e) = self.ctx.commands().create_response(Some(greeting)).await {
            warn!(call_id = %self.ctx.call_id(), error = %e, "Failed to request greeting");
            self.ctx.terminate(EndReason::UpstreamClosed);
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn handle_frame(&mut self, text: &str) -> Flow {
        let event = match TelephonyEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                self.stats.frames_dropped += 1;
                warn!(
                    call_id = %self.ctx.call_id(),
                    sequence = sequence_hint(text).as_deref().unwrap_or("-"),
                    error = %e,
                    "Dropping malformed telephony frame"
                );
                return Flow::Continue;
            }
        };

        match event {
            TelephonyEvent::Media(frame) => self.forward_media(frame).await,
            TelephonyEvent::Stop => {
                info!(call_id = %self.ctx.call_id(), "Telephony stream stopped");
                self.force_commit().await;
                self.ctx.terminate(EndReason::TelephonyStop);
                Flow::Stop
            }
            TelephonyEvent::Dtmf { digit } => {
                info!(
                    call_id = %self.ctx.call_id(),
                    digit = digit.as_deref().unwrap_or(""),
                    "DTMF received"
                );
                Flow::Continue
            }
            other => {
                debug!(call_id = %self.ctx.call_id(), event = other.kind(), "Ignoring telephony event");
                Flow::Continue
            }
        }
    }

    async fn forward_media(&mut self, frame: MediaFrame) -> Flow {
        if self.ctx.is_terminating() {
            return Flow::Stop;
        }
        if !frame.track.is_caller_audio() {
            self.stats.frames_filtered += 1;
            return Flow::Continue;
        }

        let audio = match self.pipeline.convert(&frame.payload) {
            Ok(audio) => audio,
            Err(e) => {
                self.stats.frames_dropped += 1;
                warn!(
                    call_id = %self.ctx.call_id(),
                    sequence = frame.sequence,
                    error = %e,
                    "Dropping unconvertible media frame"
                );
                return Flow::Continue;
            }
        };
        if audio.is_empty() {
            return Flow::Continue;
        }

        if self.media_log.should_log() {
            debug!(
                call_id = %self.ctx.call_id(),
                sequence = frame.sequence,
                bytes = audio.len(),
                "Forwarding caller audio"
            );
        }

        if let Err(e) = self.ctx.commands().append_audio(audio).await {
            warn!(call_id = %self.ctx.call_id(), error = %e, "Upstream rejected audio");
            self.ctx.terminate(EndReason::UpstreamClosed);
            return Flow::Stop;
        }
        self.stats.frames_forwarded += 1;

        if self.ctx.record_chunk() >= self.ctx.commit_threshold() {
            if let Err(e) = self.ctx.commands().commit_audio().await {
                warn!(call_id = %self.ctx.call_id(), error = %e, "Upstream rejected commit");
                self.ctx.terminate(EndReason::UpstreamClosed);
                return Flow::Stop;
            }
            self.ctx.reset_chunks();
            self.stats.threshold_commits += 1;
        }
        Flow::Continue
    }

    /// Commit whatever is buffered, regardless of the counter.
    async fn force_commit(&mut self) {
        match self.ctx.commands().commit_audio().await {
            Ok(()) => {
                self.ctx.reset_chunks();
                self.stats.forced_commit = true;
            }
            Err(e) => {
                warn!(call_id = %self.ctx.call_id(), error = %e, "Final commit failed");
            }
        }
    }
}

/// Best-effort sequence number from a frame that failed to decode.
fn sequence_hint(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let sequence = value
        .get("sequence_number")
        .or_else(|| value.get("sequenceNumber"))?;
    match sequence {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
