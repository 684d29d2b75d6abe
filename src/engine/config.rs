//! Configuration for the execution core.
//!
//! Entities are configured by constructing a plain struct in code: no
//! TOML/YAML/env-file parsing dependency is introduced, and loading
//! configuration from disk or environment is left to the embedding CLI/RPC
//! layer (spec.md §1, out of scope).
//!
//! # Example
//!
//! ```rust
//! use agentcore::engine::config::{EngineConfig, ParserStrategy};
//!
//! let config = EngineConfig {
//!     max_tool_iterations: 8,
//!     parser_strategy: ParserStrategy::Xml,
//!     ..EngineConfig::default()
//! };
//! assert_eq!(config.max_tool_iterations, 8);
//! ```

pub use crate::engine::parser::strategy::ParserStrategy;

/// Per-entity tuning knobs that do not change the shape of the state
/// machine, only its thresholds and defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each of the agent's six input queues (spec §3). Enqueuing
    /// onto a full queue blocks the caller, or fails with
    /// [`QueueError::QueueFull`](crate::engine::error::QueueError::QueueFull)
    /// for non-blocking submissions.
    pub queue_capacity: usize,

    /// Whether a `PendingToolInvocation` is auto-executed or routed through
    /// the `AWAITING_TOOL_APPROVAL` gate (spec §4.6).
    pub auto_execute_tools: bool,

    /// Which tool-call syntax the streaming parser is configured for this
    /// stream (spec §4.5). No fixed default is mandated by the spec (Open
    /// Question 2); this crate defaults to `ApiToolCall` since it requires
    /// no text-format guessing.
    pub parser_strategy: ParserStrategy,

    /// Soft cap applied by the queue wait's cancellation-safe poll (spec
    /// §4.1, §5) so the worker periodically re-checks its stop signal even
    /// while all queues are empty.
    pub queue_wait_timeout_ms: u64,

    /// Bound on how many LLM round-trips one user turn may drive through the
    /// tool-call aggregation loop (handle response → tool(s) → synthetic
    /// `sender=TOOL` message → handle response again) before the dispatcher
    /// gives up and raises `AgentError` instead of looping forever. Mirrors
    /// `BasicPlanner::max_tool_iterations` (`planner.rs`), generalized from a
    /// single planner's budget to a per-turn guard every entity carries.
    pub max_tool_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            auto_execute_tools: false,
            parser_strategy: ParserStrategy::ApiToolCall,
            queue_wait_timeout_ms: 250,
            max_tool_iterations: 8,
        }
    }
}
