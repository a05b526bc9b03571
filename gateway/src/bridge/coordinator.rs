//! Call lifecycle: Connecting, Active, Draining, Closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use super::context::{CallIdentity, SessionContext};
use super::egress::{EgressOutcome, EgressRelay};
use super::ingress::IngressRelay;
use super::transport::{InboundStream, TelephonySender, TelephonyTransport};
use super::{BridgeError, EndReason, SessionPhase, SessionReport};
use crate::config::{BridgeSettings, RealtimeSettings};
use crate::core::codec::AudioPipeline;
use crate::core::realtime::{
    InputTranscriptionConfig, RealtimeConfig, RealtimeConnection, RealtimeConnector,
    SessionSettings, TurnDetectionConfig,
};
use crate::core::telephony::{StreamStart, TelephonyDialect, TelephonyEvent};
use crate::services::agents::{AgentConfiguration, AgentResolver};
use crate::services::call_records::{CallEnded, CallRecordStore, CallStarted, TranscriptEntry};
use crate::services::tools::{BuiltinToolRegistry, END_CALL_TOOL, ToolRegistry};

/// Upper bound on each call-record notification.
const RECORD_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every call.
#[derive(Clone)]
pub struct BridgeServices {
    pub agents: Arc<dyn AgentResolver>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub tools: Arc<dyn ToolRegistry>,
    pub records: Arc<dyn CallRecordStore>,
}

/// Which agent a telephony connection is for.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub agent_id: String,
    pub workspace_id: Option<String>,
    pub dialect: TelephonyDialect,
}

struct Connected {
    agent: Arc<AgentConfiguration>,
    connection: RealtimeConnection,
    start: StreamStart,
}

/// Runs calls. Cheap to clone; one instance serves the whole process.
#[derive(Clone)]
pub struct CallBridge {
    services: BridgeServices,
    settings: BridgeSettings,
    realtime: RealtimeSettings,
}

impl CallBridge {
    pub fn new(services: BridgeServices, settings: BridgeSettings, realtime: RealtimeSettings) -> Self {
        Self {
            services,
            settings,
            realtime,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Bridge one telephony connection until the call ends.
    ///
    /// Always closes the telephony side before returning.
    pub async fn run(&self, request: CallRequest, transport: TelephonyTransport) -> SessionReport {
        let session_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "call",
            session_id = %session_id,
            agent_id = %request.agent_id,
            dialect = %request.dialect,
        );
        self.run_session(session_id, request, transport)
            .instrument(span)
            .await
    }

    async fn run_session(
        &self,
        session_id: String,
        request: CallRequest,
        transport: TelephonyTransport,
    ) -> SessionReport {
        let started = Instant::now();
        let mut report = SessionReport::new(session_id);
        report.enter(SessionPhase::Connecting);

        let TelephonyTransport {
            mut inbound,
            outbound,
        } = transport;

        let connected = match self.connect(&request, &mut inbound).await {
            Ok(connected) => connected,
            Err(err) => {
                let close = err.close_frame();
                warn!(error = %err, code = close.code, "Call rejected");
                let _ = outbound.close(close.code, close.reason).await;
                report.rejection = Some(err.to_string());
                report.close = Some(close);
                report.enter(SessionPhase::Closed);
                report.duration = started.elapsed();
                return report;
            }
        };

        self.run_active(connected, request, inbound, outbound, &mut report)
            .await;
        report.duration = started.elapsed();
        report
    }

    async fn connect(
        &self,
        request: &CallRequest,
        inbound: &mut InboundStream,
    ) -> Result<Connected, BridgeError> {
        let resolved = tokio::time::timeout(
            self.settings.resolve_timeout,
            self.services
                .agents
                .resolve(&request.agent_id, request.workspace_id.as_deref()),
        )
        .await
        .map_err(|_| BridgeError::ResolveTimeout(self.settings.resolve_timeout))??;

        let agent = resolved.agent;
        let config = RealtimeConfig {
            api_key: resolved.credentials.api_key.clone(),
            model: resolved
                .credentials
                .model
                .clone()
                .unwrap_or_else(|| self.realtime.model.clone()),
            url: self.realtime.url.clone(),
        };

        debug!(model = %config.model, "Connecting upstream");
        let connection = self.services.connector.connect(&config).await?;

        let settings = self.session_settings(&agent);
        let connected = match connection.commands.update_session(settings).await {
            Ok(()) => {
                let deadline = tokio::time::Instant::now() + self.settings.start_timeout;
                await_start(inbound, deadline, self.settings.start_timeout).await
            }
            Err(e) => Err(BridgeError::Upstream(e)),
        };

        match connected {
            Ok(start) => Ok(Connected {
                agent,
                connection,
                start,
            }),
            Err(err) => {
                connection.closer.close(self.settings.drain_timeout).await;
                Err(err)
            }
        }
    }

    fn session_settings(&self, agent: &AgentConfiguration) -> SessionSettings {
        let format = self.settings.upstream_audio_format.wire_name();

        let mut tools = vec![BuiltinToolRegistry::end_call_definition()];
        tools.extend(
            agent
                .enabled_tools
                .iter()
                .filter(|tool| tool.name != END_CALL_TOOL)
                .cloned(),
        );

        let instructions = match (&agent.system_prompt, &agent.language) {
            (Some(prompt), Some(language)) => {
                Some(format!("{prompt}\n\nAlways respond in {language}."))
            }
            (Some(prompt), None) => Some(prompt.clone()),
            (None, Some(language)) => Some(format!("Always respond in {language}.")),
            (None, None) => None,
        };

        SessionSettings {
            instructions,
            voice: Some(agent.voice.clone()),
            input_audio_format: Some(format.to_string()),
            output_audio_format: Some(format.to_string()),
            input_audio_transcription: agent.enable_transcript.then(|| InputTranscriptionConfig {
                model: self.realtime.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetectionConfig::default()),
            tools,
            tool_choice: Some("auto".to_string()),
            temperature: None,
            modalities: None,
        }
    }

    async fn run_active(
        &self,
        connected: Connected,
        request: CallRequest,
        inbound: InboundStream,
        outbound: TelephonySender,
        report: &mut SessionReport,
    ) {
        let Connected {
            agent,
            connection,
            start,
        } = connected;
        let RealtimeConnection {
            commands,
            events,
            closer,
        } = connection;

        let identity = CallIdentity {
            call_identifier: start.call_id,
            stream_identifier: start.stream_id,
            dialect: request.dialect,
            agent_id: request.agent_id,
            workspace_id: request.workspace_id,
        };
        let commit_threshold = agent
            .commit_threshold
            .unwrap_or(self.settings.commit_threshold);
        let ctx = Arc::new(SessionContext::new(
            identity,
            agent,
            commit_threshold,
            commands,
            self.services.tools.clone(),
            closer,
        ));

        report.call_identifier = Some(ctx.call_id().to_string());
        report.enter(SessionPhase::Active);
        info!(
            call_id = %ctx.call_id(),
            stream_id = %ctx.identity().stream_identifier,
            commit_threshold = ctx.commit_threshold(),
            "Call active"
        );
        let format = self.settings.upstream_audio_format;
        let ingress = IngressRelay::new(
            ctx.clone(),
            inbound,
            AudioPipeline::ingress(format),
            self.settings.greeting_delay,
        );
        let egress = EgressRelay::new(
            ctx.clone(),
            events,
            outbound.clone(),
            AudioPipeline::egress(format),
            self.settings.tool_timeout,
            self.settings.clear_on_barge_in,
        );
        let mut ingress_task = tokio::spawn(ingress.run().in_current_span());
        let mut egress_task = tokio::spawn(egress.run().in_current_span());
        let started_record = self.notify_started(&ctx);

        let mut ingress_result = None;
        let mut egress_result = None;
        tokio::select! {
            _ = ctx.terminated() => {}
            _ = tokio::time::sleep(self.settings.max_call_duration) => {
                ctx.terminate(EndReason::MaxDurationExceeded);
            }
            result = &mut ingress_task => ingress_result = Some(result),
            result = &mut egress_task => egress_result = Some(result),
        }
        // A relay that panicked never recorded a reason.
        ctx.terminate(EndReason::RelayFailed);

        report.enter(SessionPhase::Draining);
        let deadline = tokio::time::Instant::now() + self.settings.drain_timeout;
        let ingress_stats = match ingress_result {
            Some(result) => result.ok(),
            None => join_relay("ingress", &mut ingress_task, deadline).await,
        };
        let egress_outcome = match egress_result {
            Some(result) => result.ok(),
            None => join_relay("egress", &mut egress_task, deadline).await,
        };

        ctx.close_upstream(self.settings.drain_timeout).await;
        let reason = ctx.end_reason().unwrap_or(EndReason::RelayFailed);
        let close = reason.close_frame();
        if let Err(e) = outbound.close(close.code, close.reason).await {
            debug!(error = %e, "Telephony already closed");
        }
        report.enter(SessionPhase::Closed);

        let EgressOutcome { stats, transcript } = egress_outcome.unwrap_or_default();
        report.end_reason = Some(reason);
        report.close = Some(close);
        report.ingress = ingress_stats.unwrap_or_default();
        report.egress = stats;

        info!(
            call_id = %ctx.call_id(),
            end_reason = %reason,
            duration_ms = ctx.elapsed().as_millis() as u64,
            frames_in = report.ingress.frames_forwarded,
            frames_out = report.egress.deltas_forwarded,
            "Call closed"
        );
        // Keeps the started record ahead of the ended one.
        if started_record.await.is_err() {
            debug!(call_id = %ctx.call_id(), "Call start record task aborted");
        }
        self.notify_ended(&ctx, reason, transcript).await;
    }

    /// Report the call start without holding up the relays.
    fn notify_started(&self, ctx: &SessionContext) -> JoinHandle<()> {
        let identity = ctx.identity();
        let call_id = identity.call_identifier.clone();
        let records = self.services.records.clone();
        let record = CallStarted {
            call_identifier: identity.call_identifier.clone(),
            stream_identifier: identity.stream_identifier.clone(),
            agent_id: identity.agent_id.clone(),
            workspace_id: identity.workspace_id.clone(),
            dialect: identity.dialect.to_string(),
        };
        tokio::spawn(
            async move {
                match tokio::time::timeout(RECORD_TIMEOUT, records.session_started(record)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(call_id = %call_id, error = %e, "Call start record failed"),
                    Err(_) => warn!(call_id = %call_id, "Call start record timed out"),
                }
            }
            .in_current_span(),
        )
    }

    async fn notify_ended(
        &self,
        ctx: &SessionContext,
        reason: EndReason,
        transcript: Vec<TranscriptEntry>,
    ) {
        let identity = ctx.identity();
        let record = CallEnded {
            call_identifier: identity.call_identifier.clone(),
            agent_id: identity.agent_id.clone(),
            workspace_id: identity.workspace_id.clone(),
            end_reason: reason,
            duration_ms: ctx.elapsed().as_millis() as u64,
            transcript,
        };
        match tokio::time::timeout(RECORD_TIMEOUT, self.services.records.session_ended(record)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(call_id = %ctx.call_id(), error = %e, "Call end record failed"),
            Err(_) => warn!(call_id = %ctx.call_id(), "Call end record timed out"),
        }
    }
}

/// Read telephony frames until `start`.
async fn await_start(
    inbound: &mut InboundStream,
    deadline: tokio::time::Instant,
    start_timeout: Duration,
) -> Result<StreamStart, BridgeError> {
    loop {
        let frame = tokio::time::timeout_at(deadline, inbound.next())
            .await
            .map_err(|_| BridgeError::StartTimeout(start_timeout))?;
        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(BridgeError::Transport(e)),
            None => return Err(BridgeError::EndedBeforeStart),
        };

        match TelephonyEvent::parse(&text) {
            Ok(TelephonyEvent::Start(start)) => {
                info!(
                    call_id = %start.call_id,
                    stream_id = %start.stream_id,
                    "Telephony stream started"
                );
                return Ok(start);
            }
            Ok(TelephonyEvent::Stop) => return Err(BridgeError::EndedBeforeStart),
            Ok(other) => debug!(event = other.kind(), "Ignoring frame before start"),
            Err(e) => warn!(error = %e, "Dropping malformed frame before start"),
        }
    }
}

/// Wait for a relay until `deadline`, aborting it if it overruns.
async fn join_relay<T>(
    name: &'static str,
    task: &mut JoinHandle<T>,
    deadline: tokio::time::Instant,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut *task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(relay = name, error = %e, "Relay task failed");
            None
        }
        Err(_) => {
            warn!(relay = name, "Relay did not stop within drain timeout, aborting");
            task.abort();
            None
        }
    }
}
