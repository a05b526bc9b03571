//! State shared by the two relays of one call.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::EndReason;
use crate::core::realtime::{RealtimeSender, UpstreamCloser};
use crate::core::telephony::TelephonyDialect;
use crate::services::agents::AgentConfiguration;
use crate::services::tools::ToolRegistry;

/// Identifiers fixed when the telephony `start` frame arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub call_identifier: String,
    pub stream_identifier: String,
    pub dialect: TelephonyDialect,
    pub agent_id: String,
    pub workspace_id: Option<String>,
}

/// One-shot termination flag with a recorded reason.
///
/// The first [`trigger`](Self::trigger) stores its reason and wakes every
/// waiter; later triggers are ignored.
#[derive(Debug, Default)]
pub struct TerminationSignal {
    reason: OnceLock<EndReason>,
    token: CancellationToken,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call recorded the reason.
    pub fn trigger(&self, reason: EndReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<EndReason> {
        self.reason.get().copied()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub struct SessionContext {
    identity: CallIdentity,
    agent: Arc<AgentConfiguration>,
    commit_threshold: u32,
    /// Written only by the ingress relay.
    inbound_chunk_count: AtomicU32,
    termination: TerminationSignal,
    commands: RealtimeSender,
    tools: Arc<dyn ToolRegistry>,
    upstream: Mutex<Option<UpstreamCloser>>,
    started_at: Instant,
}

impl SessionContext {
    pub fn new(
        identity: CallIdentity,
        agent: Arc<AgentConfiguration>,
        commit_threshold: u32,
        commands: RealtimeSender,
        tools: Arc<dyn ToolRegistry>,
        upstream: UpstreamCloser,
    ) -> Self {
        Self {
            identity,
            agent,
            commit_threshold: commit_threshold.max(1),
            inbound_chunk_count: AtomicU32::new(0),
            termination: TerminationSignal::new(),
            commands,
            tools,
            upstream: Mutex::new(Some(upstream)),
            started_at: Instant::now(),
        }
    }

    pub fn identity(&self) -> &CallIdentity {
        &self.identity
    }

    pub fn call_id(&self) -> &str {
        &self.identity.call_identifier
    }

    pub fn agent(&self) -> &AgentConfiguration {
        &self.agent
    }

    pub fn commit_threshold(&self) -> u32 {
        self.commit_threshold
    }

    /// Chunks appended since the last commit.
    pub fn chunk_count(&self) -> u32 {
        self.inbound_chunk_count.load(Ordering::Acquire)
    }

    pub(super) fn record_chunk(&self) -> u32 {
        self.inbound_chunk_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(super) fn reset_chunks(&self) {
        self.inbound_chunk_count.store(0, Ordering::Release);
    }

    pub fn commands(&self) -> &RealtimeSender {
        &self.commands
    }

    pub fn tools(&self) -> &Arc<dyn ToolRegistry> {
        &self.tools
    }

    /// Request the end of the call. Only the first reason is kept.
    pub fn terminate(&self, reason: EndReason) -> bool {
        let first = self.termination.trigger(reason);
        if first {
            info!(call_id = %self.identity.call_identifier, reason = %reason, "Terminating call");
        }
        first
    }

    #[inline]
    pub fn is_terminating(&self) -> bool {
        self.termination.is_triggered()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.termination.reason()
    }

    pub async fn terminated(&self) {
        self.termination.triggered().await
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.termination.token()
    }

    /// Close the upstream session. Returns `false` if it was already closed.
    pub async fn close_upstream(&self, grace: Duration) -> bool {
        let closer = self.upstream.lock().take();
        match closer {
            Some(closer) => {
                closer.close(grace).await;
                true
            }
            None => false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
