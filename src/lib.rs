// src/lib.rs

//! The per-entity runtime core of a multi-agent framework: prioritized input
//! queues, a lifecycle state machine, a streaming tool-call parser, tool
//! invocation lifecycle handling, and an external event notifier/multiplexer
//! for Team and Workflow composition.
//!
//! See `engine` for the module map and `SPEC_FULL.md` / `DESIGN.md` in the
//! repository root for the full design.

pub mod engine;

pub use engine::{EngineConfig, EventDispatcher, RuntimeEvent, Status, Worker, WorkerHandle};
