//! Per-call bridge between a telephony media stream and an upstream realtime
//! session.
//!
//! Each call runs through four phases:
//!
//! ```text
//! Connecting -> Active -> Draining -> Closed
//!      |                                 ^
//!      +---------- (rejected) -----------+
//! ```
//!
//! - **Connecting**: resolve the agent, open the upstream session, configure
//!   it, and wait for the telephony `start` frame.
//! - **Active**: the ingress relay (caller -> model) and egress relay
//!   (model -> caller) run concurrently until something requests termination.
//! - **Draining**: both relays are given a bounded grace period to stop.
//! - **Closed**: the upstream session and the telephony socket are closed and
//!   the call record is finalized.

mod context;
mod coordinator;
mod egress;
mod ingress;
mod transport;


use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::realtime::RealtimeError;
use crate::services::agents::ResolveError;

pub use context::{CallIdentity, SessionContext, TerminationSignal};
pub use coordinator::{BridgeServices, CallBridge, CallRequest};
pub use egress::EgressOutcome;
pub use transport::{InboundStream, Outbound, TelephonySender, TelephonyTransport, TransportError};

/// Why an active call ended. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The provider sent `stop`
    TelephonyStop,
    /// The telephony socket closed without `stop`
    TelephonyClosed,
    /// Reading from or writing to the telephony socket failed
    TelephonyError,
    /// The upstream session went away
    UpstreamClosed,
    /// The upstream session reported a fatal error
    UpstreamError,
    /// The model invoked `end_call` and finished its response
    AgentHangup,
    /// The call reached `max_call_duration`
    MaxDurationExceeded,
    /// A relay exited without recording a reason
    RelayFailed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::TelephonyStop => "telephony_stop",
            EndReason::TelephonyClosed => "telephony_closed",
            EndReason::TelephonyError => "telephony_error",
            EndReason::UpstreamClosed => "upstream_closed",
            EndReason::UpstreamError => "upstream_error",
            EndReason::AgentHangup => "agent_hangup",
            EndReason::MaxDurationExceeded => "max_duration_exceeded",
            EndReason::RelayFailed => "relay_failed",
        }
    }

    /// Close frame sent to the telephony provider for this outcome.
    pub fn close_frame(&self) -> TelephonyClose {
        match self {
            EndReason::TelephonyStop | EndReason::TelephonyClosed => {
                TelephonyClose::new(1000, "Call ended")
            }
            EndReason::AgentHangup => TelephonyClose::new(1000, "Call ended by agent"),
            EndReason::MaxDurationExceeded => {
                TelephonyClose::new(1000, "Maximum call duration reached")
            }
            EndReason::TelephonyError => TelephonyClose::new(1011, "Telephony stream error"),
            EndReason::UpstreamClosed => TelephonyClose::new(1011, "Upstream closed"),
            EndReason::UpstreamError => TelephonyClose::new(1011, "Upstream error"),
            EndReason::RelayFailed => TelephonyClose::new(1011, "Internal error"),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket close code and reason for the telephony side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephonyClose {
    pub code: u16,
    pub reason: &'static str,
}

impl TelephonyClose {
    pub const fn new(code: u16, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Connecting => write!(f, "connecting"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Draining => write!(f, "draining"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Errors that end a call before it becomes active.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Agent resolution timed out after {0:?}")]
    ResolveTimeout(Duration),

    #[error("Upstream unavailable: {0}")]
    Upstream(#[from] RealtimeError),

    #[error("Telephony stream ended before start")]
    EndedBeforeStart,

    #[error("No start event within {0:?}")]
    StartTimeout(Duration),

    #[error("Telephony transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl BridgeError {
    pub fn close_frame(&self) -> TelephonyClose {
        match self {
            BridgeError::Resolve(ResolveError::NotFound(_)) => {
                TelephonyClose::new(4004, "Agent not found")
            }
            BridgeError::Resolve(ResolveError::Unauthorized(_)) => {
                TelephonyClose::new(4003, "Unauthorized")
            }
            BridgeError::Resolve(ResolveError::InvalidWorkspace(_)) => {
                TelephonyClose::new(4000, "Invalid workspace")
            }
            BridgeError::Resolve(ResolveError::Unavailable(_)) | BridgeError::ResolveTimeout(_) => {
                TelephonyClose::new(1011, "Agent lookup unavailable")
            }
            BridgeError::Upstream(_) => TelephonyClose::new(1011, "Upstream unavailable"),
            BridgeError::EndedBeforeStart => TelephonyClose::new(1000, "Stream ended"),
            BridgeError::StartTimeout(_) => TelephonyClose::new(1008, "No start event"),
            BridgeError::Transport(_) => TelephonyClose::new(1011, "Telephony stream error"),
        }
    }
}

/// Counters kept by the ingress relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    pub frames_forwarded: u64,
    /// Malformed frames and payloads that failed conversion
    pub frames_dropped: u64,
    /// Media on tracks other than the caller's
    pub frames_filtered: u64,
    pub threshold_commits: u64,
    pub forced_commit: bool,
}

/// Counters kept by the egress relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressStats {
    pub deltas_forwarded: u64,
    pub deltas_dropped: u64,
    pub clears_sent: u64,
    pub tool_calls: u64,
}

/// Summary of one call, returned once the session is closed.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub call_identifier: Option<String>,
    /// Phases in the order they were entered
    pub phases: Vec<SessionPhase>,
    /// Set for calls that reached Active
    pub end_reason: Option<EndReason>,
    /// Set for calls rejected during Connecting
    pub rejection: Option<String>,
    pub close: Option<TelephonyClose>,
    pub ingress: IngressStats,
    pub egress: EgressStats,
    pub duration: Duration,
}

impl SessionReport {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            call_identifier: None,
            phases: Vec::with_capacity(4),
            end_reason: None,
            rejection: None,
            close: None,
            ingress: IngressStats::default(),
            egress: EgressStats::default(),
            duration: Duration::ZERO,
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(phase = %phase, "Session phase");
        self.phases.push(phase);
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.phases.last().copied()
    }
}
