//! External collaborator contracts (spec.md §6). The core consumes these
//! narrow traits; it never defines their implementations — concrete LLM
//! SDKs, memory engines, and tools live outside this crate.

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;

use crate::engine::parser::ChunkResponse;

pub use crate::engine::parser::TokenUsage;

/// Message role on the wire to an LLM provider, mirroring the teacher's
/// `Role` but kept local so this module has no dependency on `cloudllm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone)]
pub struct ContractMessage {
    pub role: ContractRole,
    pub content: String,
}

/// Opaque per-call cancellation/deadline context (spec §5, "Cancellation &
/// timeouts"). The core never inspects its contents; it only passes it
/// through.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct ContractError(pub String);

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for ContractError {}

/// `LLM provider contract` (spec §6): `stream_messages(messages, tools?,
/// ctx) → AsyncSeq<ChunkResponse>`. Modeled as a boxed stream rather than
/// an `async fn` returning `impl Stream` so the trait stays object-safe
/// (the worker holds it as `Arc<dyn LlmProvider>`).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream_messages(
        &self,
        messages: &[ContractMessage],
        tools: Option<&Value>,
        ctx: &CallContext,
    ) -> Result<Vec<ChunkResponse>, ContractError>;
}

/// `Memory contract` (spec §6): ingest hooks, transcript accessor, reset,
/// and a compaction trigger flag. Concrete persistence (hash-chained log,
/// database, etc.) is opaque to the core — it only calls this trait.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn ingest_user_message(&self, content: &str) -> Result<(), ContractError>;
    async fn ingest_tool_intent(&self, tool_name: &str, arguments: &Value) -> Result<(), ContractError>;
    async fn ingest_tool_result(&self, invocation_id: &str, result: &Value) -> Result<(), ContractError>;
    async fn ingest_assistant_response(&self, content: &str) -> Result<(), ContractError>;

    async fn get_transcript_messages(&self) -> Result<Vec<ContractMessage>, ContractError>;
    async fn reset_transcript(&self, snapshot: Vec<ContractMessage>) -> Result<(), ContractError>;

    /// True once the memory subsystem judges a compaction pass should run
    /// before the next LLM call (spec §9, Open Question: compaction is
    /// treated as a pre-next-call flag the core checks, not a core-owned
    /// scheduling decision).
    fn compaction_due(&self) -> bool {
        false
    }
}

/// `Tool contract` (spec §6): `execute(ctx, args) → result | error`, plus
/// optional schema, pre/post processors, and lifetime hooks.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &CallContext, args: &Value) -> Result<Value, ContractError>;

    /// JSON schema describing accepted arguments, if the tool publishes one.
    fn arguments_schema(&self) -> Option<Value> {
        None
    }

    /// Mutates `arguments` in place before execution; an `Err` short-circuits
    /// execution and becomes `ToolResult{error=...}` (spec §4.6 step 1).
    async fn preprocess(&self, _arguments: &mut Value) -> Result<(), ContractError> {
        Ok(())
    }

    /// Runs on a successful result before it's handed to the multi-turn
    /// aggregator (spec §4.6, ToolResult handler step 1).
    async fn postprocess(&self, _result: &mut Value) -> Result<(), ContractError> {
        Ok(())
    }

    /// Runs once when the owning entity shuts down (spec §4.2 shutdown
    /// orchestrator, "cleans up tools").
    async fn cleanup(&self) -> Result<(), ContractError> {
        Ok(())
    }
}
