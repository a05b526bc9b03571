//! Collaborators the bridge calls out to: agent lookup, tool execution and
//! call-record persistence. Each sits behind an async trait so tests and
//! deployments can swap implementations.

pub mod agents;
pub mod call_records;
pub mod tools;

pub use agents::{
    AgentConfiguration, AgentResolver, ConfigAgentResolver, RealtimeCredentials, ResolveError,
    ResolvedAgent,
};
pub use call_records::{
    CallEnded, CallRecordStore, CallStarted, LoggingCallRecordStore, RecordError,
    TranscriptEntry, WebhookCallRecordStore,
};
pub use tools::{
    BuiltinToolRegistry, END_CALL_TOOL, ToolAction, ToolError, ToolInvocation, ToolOutcome,
    ToolRegistry, WebhookToolRegistry, invoke_with_timeout,
};
