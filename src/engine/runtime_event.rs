//! The dispatcher-level `Event` tagged union (spec.md §3).
//!
//! Every event ingested by an entity's worker loop is one of these kinds.
//! Events are immutable once dispatched — handlers receive a `&RuntimeEvent`
//! and never mutate it in place.

use serde_json::Value;
use std::sync::Arc;

use crate::engine::parser::invocation::ToolInvocation;

/// Which of an agent's six queues (or a team/workflow's two) an event
/// belongs to. Also doubles as the priority key consumed by
/// [`InputQueueSet::next`](crate::engine::queue::InputQueueSet::next).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    UserMessage,
    InterAgentMessage,
    ToolInvocationRequest,
    ToolResult,
    ToolApproval,
    InternalSystem,
}

impl QueueKind {
    /// The full agent queue set, in priority order (spec §4.1: high → low).
    pub const AGENT_PRIORITY_ORDER: [QueueKind; 6] = [
        QueueKind::UserMessage,
        QueueKind::InterAgentMessage,
        QueueKind::ToolInvocationRequest,
        QueueKind::ToolResult,
        QueueKind::ToolApproval,
        QueueKind::InternalSystem,
    ];

    /// The team/workflow queue set, in priority order (spec §3).
    pub const TEAM_PRIORITY_ORDER: [QueueKind; 2] =
        [QueueKind::UserMessage, QueueKind::InternalSystem];
}

/// Who originated a synthetic user message (spec §4.6, aggregation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    User,
    Agent,
    Tool,
}

/// One entry of the aggregated multi-tool result message (spec §4.6).
#[derive(Debug, Clone)]
pub struct AggregatedToolResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub is_denied: bool,
    pub error: Option<String>,
    pub output: Option<Value>,
}

/// The runtime event tagged union (spec.md §3).
///
/// `kind()` returns the queue an event is routed through; this is what the
/// [`InputQueueSet`](crate::engine::queue::InputQueueSet) uses for priority
/// selection and what the [`EventDispatcher`](crate::engine::dispatcher::EventDispatcher)
/// switches on.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A message typed or submitted by the end user.
    UserMessageReceived { content: String },
    /// The user message (plus any system framing) is ready to be sent to the
    /// LLM provider.
    LLMUserMessageReady { content: String },
    /// A message from another agent, routed by a Team's coordinator (spec §4.8).
    InterAgentMessageRequest {
        from_agent_id: String,
        content: String,
    },
    /// The parser emitted a tool segment; an invocation is now pending
    /// approval or direct execution.
    PendingToolInvocation {
        invocation: Arc<ToolInvocation>,
        auto_execute: bool,
    },
    /// Approval (or execution, if auto-approved) has cleared and the tool
    /// should actually run.
    ExecuteToolInvocation { invocation: Arc<ToolInvocation> },
    /// The user (or an automated policy) approved or denied a pending
    /// invocation.
    ToolExecutionApproval {
        invocation_id: String,
        approved: bool,
        reason: Option<String>,
    },
    /// A tool finished executing (or was denied), carrying its settled
    /// result.
    ToolResult {
        invocation_id: String,
        is_denied: bool,
        error: Option<String>,
        output: Option<Value>,
    },
    /// The LLM provider's stream reached `is_complete`.
    LLMCompleteResponseReceived { response_text: String },
    /// Bootstrap completed successfully.
    AgentReady,
    /// The stop signal was honoured and the loop is exiting.
    AgentStopped,
    /// A handler raised, or bootstrap failed.
    AgentError { message: String },
    /// Internal bookkeeping not tied to any of the above (e.g. compaction
    /// triggers, periodic housekeeping ticks).
    InternalSystem { tag: String, payload: Option<Value> },
}

impl RuntimeEvent {
    /// The queue this event is routed through once enqueued.
    pub fn queue_kind(&self) -> QueueKind {
        match self {
            RuntimeEvent::UserMessageReceived { .. } => QueueKind::UserMessage,
            RuntimeEvent::LLMUserMessageReady { .. } => QueueKind::UserMessage,
            RuntimeEvent::InterAgentMessageRequest { .. } => QueueKind::InterAgentMessage,
            RuntimeEvent::PendingToolInvocation { .. } => QueueKind::ToolInvocationRequest,
            RuntimeEvent::ExecuteToolInvocation { .. } => QueueKind::ToolInvocationRequest,
            RuntimeEvent::ToolExecutionApproval { .. } => QueueKind::ToolApproval,
            RuntimeEvent::ToolResult { .. } => QueueKind::ToolResult,
            RuntimeEvent::LLMCompleteResponseReceived { .. } => QueueKind::InternalSystem,
            RuntimeEvent::AgentReady => QueueKind::InternalSystem,
            RuntimeEvent::AgentStopped => QueueKind::InternalSystem,
            RuntimeEvent::AgentError { .. } => QueueKind::InternalSystem,
            RuntimeEvent::InternalSystem { .. } => QueueKind::InternalSystem,
        }
    }
}
