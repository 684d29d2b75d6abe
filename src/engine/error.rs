//! Error taxonomy for the execution core (spec §7).
//!
//! Every subsystem exposes a concrete local error type implementing
//! `std::error::Error` by hand, matching the rest of this crate (no
//! `thiserror`/`anyhow`). Errors that are purely internal to a handler are
//! never allowed to cross the worker boundary as a Rust error — they are
//! converted into an `AgentError` runtime event instead (see
//! `engine::dispatcher`). The types here are for APIs that *can* fail
//! synchronously to the caller: queue submission, bootstrap, and the parser's
//! public entry points.

use std::error::Error;
use std::fmt;

/// Errors raised when submitting to or draining an [`InputQueueSet`](crate::engine::queue::InputQueueSet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The target queue is at capacity and the caller requested a
    /// non-blocking submission.
    QueueFull { queue: &'static str },
    /// The worker has stopped accepting new work (shutdown in progress or
    /// complete).
    WorkerStopped,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::QueueFull { queue } => write!(f, "queue '{}' is full", queue),
            QueueError::WorkerStopped => write!(f, "worker has stopped accepting events"),
        }
    }
}

impl Error for QueueError {}

/// Errors raised during entity bootstrap (spec §4.2).
///
/// A bootstrap failure always drives the entity to `Status::Error` and then
/// through the shutdown orchestrator; it is terminal by policy (spec §9,
/// Open Question 1 — see DESIGN.md).
#[derive(Debug, Clone)]
pub enum BootstrapError {
    /// Preparing the workspace context failed.
    WorkspacePrep(String),
    /// Pre-warming an external tool capability (e.g. MCP) failed.
    ToolCapability(String),
    /// A system-prompt processor raised.
    SystemPromptProcessor(String),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::WorkspacePrep(msg) => write!(f, "workspace prep failed: {}", msg),
            BootstrapError::ToolCapability(msg) => {
                write!(f, "tool capability pre-warm failed: {}", msg)
            }
            BootstrapError::SystemPromptProcessor(msg) => {
                write!(f, "system-prompt processor failed: {}", msg)
            }
        }
    }
}

impl Error for BootstrapError {}

/// Errors raised by a [`LifecycleHook`](crate::engine::lifecycle::LifecycleHook) or
/// [`LifecycleProcessor`](crate::engine::lifecycle::LifecycleProcessor).
///
/// Per spec §4.3, hook/processor failures are caught per-hook and logged
/// without aborting the status transition that triggered them.
#[derive(Debug, Clone)]
pub struct HookError(pub String);

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lifecycle hook failed: {}", self.0)
    }
}

impl Error for HookError {}

/// Errors raised while executing a tool invocation (spec §7, "Tool failure").
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool registered under the requested name.
    NotFound(String),
    /// A preprocessor rejected or failed to transform the arguments.
    Preprocessor(String),
    /// The tool itself raised during execution.
    Execution(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "no tool registered as '{}'", name),
            ToolError::Preprocessor(msg) => write!(f, "tool preprocessor failed: {}", msg),
            ToolError::Execution(msg) => write!(f, "tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}
