//! Model output from the upstream session to telephony.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::context::SessionContext;
use super::transport::TelephonySender;
use super::{EgressStats, EndReason};
use crate::core::codec::AudioPipeline;
use crate::core::realtime::{FunctionCallRequest, RealtimeEvent, TranscriptRole};
use crate::core::telephony::OutboundFrame;
use crate::services::call_records::TranscriptEntry;
use crate::services::tools::{ToolAction, ToolError, ToolInvocation, invoke_with_timeout};

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Hangup requested by a tool, waiting for the model to finish speaking.
#[derive(Debug, PartialEq, Eq)]
enum PendingHangup {
    /// Skip the `response.done` of the response that carried the tool call.
    AfterResponse(String),
    /// The tool call had no response id; skip the next `response.done`.
    AfterNextResponse,
    /// The next `response.done` ends the call.
    Armed,
}

#[derive(Debug, Default)]
pub struct EgressOutcome {
    pub stats: EgressStats,
    pub transcript: Vec<TranscriptEntry>,
}

pub(super) struct EgressRelay {
    ctx: Arc<SessionContext>,
    events: mpsc::Receiver<RealtimeEvent>,
    outbound: TelephonySender,
    pipeline: AudioPipeline,
    tool_timeout: Duration,
    clear_on_barge_in: bool,
    hangup: Option<PendingHangup>,
    outcome: EgressOutcome,
}

impl EgressRelay {
    pub(super) fn new(
        ctx: Arc<SessionContext>,
        events: mpsc::Receiver<RealtimeEvent>,
        outbound: TelephonySender,
        pipeline: AudioPipeline,
        tool_timeout: Duration,
        clear_on_barge_in: bool,
    ) -> Self {
        Self {
            ctx,
            events,
            outbound,
            pipeline,
            tool_timeout,
            clear_on_barge_in,
            hangup: None,
            outcome: EgressOutcome::default(),
        }
    }

    pub(super) async fn run(mut self) -> EgressOutcome {
        let cancel = self.ctx.cancellation();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                info!(call_id = %self.ctx.call_id(), "Upstream event stream ended");
                self.ctx.terminate(EndReason::UpstreamClosed);
                break;
            };

            if self.handle_event(event).await == Flow::Stop {
                break;
            }
        }

        debug!(
            call_id = %self.ctx.call_id(),
            forwarded = self.outcome.stats.deltas_forwarded,
            dropped = self.outcome.stats.deltas_dropped,
            tool_calls = self.outcome.stats.tool_calls,
            "Egress relay stopped"
        );
        self.outcome
    }

    async fn handle_event(&mut self, event: RealtimeEvent) -> Flow {
        match event {
            RealtimeEvent::AudioDelta { delta, .. } => self.forward_audio(&delta).await,
            RealtimeEvent::SpeechStarted { audio_start_ms } => {
                debug!(call_id = %self.ctx.call_id(), audio_start_ms, "Caller started speaking");
                if self.clear_on_barge_in {
                    self.clear_playback().await
                } else {
                    Flow::Continue
                }
            }
            RealtimeEvent::FunctionCall(call) => self.handle_function_call(call).await,
            RealtimeEvent::ResponseDone {
                response_id,
                status,
            } => {
                debug!(
                    call_id = %self.ctx.call_id(),
                    response_id = response_id.as_deref().unwrap_or(""),
                    status = status.as_deref().unwrap_or(""),
                    "Response done"
                );
                self.check_hangup(response_id)
            }
            RealtimeEvent::UserTranscript { text } => {
                self.record_transcript(TranscriptRole::User, text);
                Flow::Continue
            }
            RealtimeEvent::AssistantTranscriptDone { text } => {
                self.record_transcript(TranscriptRole::Assistant, text);
                Flow::Continue
            }
            RealtimeEvent::Error(err) => {
                if err.is_recoverable() {
                    warn!(
                        call_id = %self.ctx.call_id(),
                        code = err.code.as_deref().unwrap_or(""),
                        message = %err.message,
                        "Recoverable upstream error"
                    );
                    Flow::Continue
                } else {
                    error!(
                        call_id = %self.ctx.call_id(),
                        error_type = %err.error_type,
                        code = err.code.as_deref().unwrap_or(""),
                        message = %err.message,
                        "Fatal upstream error"
                    );
                    self.ctx.terminate(EndReason::UpstreamError);
                    Flow::Stop
                }
            }
            RealtimeEvent::SessionCreated { session_id } => {
                info!(
                    call_id = %self.ctx.call_id(),
                    upstream_session = %session_id,
                    "Upstream session created"
                );
                Flow::Continue
            }
            other => {
                trace!(call_id = %self.ctx.call_id(), event = other.kind(), "Upstream event");
                Flow::Continue
            }
        }
    }

    async fn forward_audio(&mut self, delta: &str) -> Flow {
        if self.ctx.is_terminating() {
            return Flow::Stop;
        }

        let raw = match BASE64_STANDARD.decode(delta) {
            Ok(raw) => raw,
            Err(e) => {
                self.outcome.stats.deltas_dropped += 1;
                warn!(call_id = %self.ctx.call_id(), error = %e, "Dropping undecodable audio delta");
                return Flow::Continue;
            }
        };
        let pcmu = match self.pipeline.convert(&raw) {
            Ok(pcmu) => pcmu,
            Err(e) => {
                self.outcome.stats.deltas_dropped += 1;
                warn!(call_id = %self.ctx.call_id(), error = %e, "Dropping unconvertible audio delta");
                return Flow::Continue;
            }
        };
        if pcmu.is_empty() {
            return Flow::Continue;
        }

        let identity = self.ctx.identity();
        let frame = OutboundFrame::media(identity.dialect, &identity.stream_identifier, &pcmu);
        let flow = self.send(frame).await;
        if flow == Flow::Continue {
            self.outcome.stats.deltas_forwarded += 1;
        }
        flow
    }

    async fn clear_playback(&mut self) -> Flow {
        let identity = self.ctx.identity();
        let frame = OutboundFrame::clear(identity.dialect, &identity.stream_identifier);
        let flow = self.send(frame).await;
        if flow == Flow::Continue {
            self.outcome.stats.clears_sent += 1;
        }
        flow
    }

    async fn send(&mut self, frame: String) -> Flow {
        match self.outbound.send_frame(frame).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(call_id = %self.ctx.call_id(), error = %e, "Telephony send failed");
                self.ctx.terminate(EndReason::TelephonyError);
                Flow::Stop
            }
        }
    }

    async fn handle_function_call(&mut self, call: FunctionCallRequest) -> Flow {
        self.outcome.stats.tool_calls += 1;
        info!(
            call_id = %self.ctx.call_id(),
            tool = %call.name,
            tool_call_id = %call.call_id,
            "Model invoked tool"
        );

        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => arguments,
                Err(e) => {
                    let err = ToolError::InvalidArguments(e.to_string());
                    return self.return_tool_output(&call.call_id, err.to_output()).await;
                }
            }
        };

        let identity = self.ctx.identity();
        let invocation = ToolInvocation {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments,
            call_identifier: identity.call_identifier.clone(),
            agent_id: identity.agent_id.clone(),
            workspace_id: identity.workspace_id.clone(),
        };

        let cancel = self.ctx.cancellation();
        let tools = self.ctx.tools().clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Flow::Stop,
            result = invoke_with_timeout(tools.as_ref(), invocation, self.tool_timeout) => result,
        };

        let output = match result {
            Ok(outcome) => {
                if let Some(ToolAction::EndCall { reason }) = outcome.action {
                    info!(
                        call_id = %self.ctx.call_id(),
                        reason = reason.as_deref().unwrap_or(""),
                        "Hangup armed"
                    );
                    self.hangup = Some(match &call.response_id {
                        Some(id) => PendingHangup::AfterResponse(id.clone()),
                        None => PendingHangup::AfterNextResponse,
                    });
                }
                outcome.output
            }
            Err(e) => {
                warn!(call_id = %self.ctx.call_id(), tool = %call.name, error = %e, "Tool failed");
                e.to_output()
            }
        };

        self.return_tool_output(&call.call_id, output).await
    }

    async fn return_tool_output(&mut self, tool_call_id: &str, output: Value) -> Flow {
        let commands = self.ctx.commands();
        let sent = match commands
            .submit_function_result(tool_call_id, output.to_string())
            .await
        {
            Ok(()) => commands.create_response(None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(call_id = %self.ctx.call_id(), error = %e, "Failed to return tool output");
            self.ctx.terminate(EndReason::UpstreamClosed);
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn check_hangup(&mut self, response_id: Option<String>) -> Flow {
        match &self.hangup {
            None => return Flow::Continue,
            Some(PendingHangup::AfterResponse(id)) if response_id.as_ref() == Some(id) => {
                return Flow::Continue;
            }
            Some(PendingHangup::AfterNextResponse) => {
                self.hangup = Some(PendingHangup::Armed);
                return Flow::Continue;
            }
            Some(_) => {}
        }
        self.hangup = None;
        self.ctx.terminate(EndReason::AgentHangup);
        Flow::Stop
    }

    fn record_transcript(&mut self, role: TranscriptRole, text: String) {
        if !self.ctx.agent().enable_transcript || text.trim().is_empty() {
            return;
        }
        debug!(call_id = %self.ctx.call_id(), role = %role, "Transcript entry");
        self.outcome.transcript.push(TranscriptEntry { role, text });
    }
}
