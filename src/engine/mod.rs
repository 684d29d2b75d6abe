//! Agent execution core: per-entity cooperative schedulers, deterministic
//! multi-queue priority event selection, a lifecycle state machine, a
//! streaming tool-call parser, tool invocation lifecycle handling, and an
//! external event notifier/multiplexer used to compose Team/Workflow
//! runtimes out of Agent runtimes.
//!
//! Module layout follows the corpus's leaf-first dependency order: the
//! parser and its invocation adapter have no dependents inside this crate
//! other than the dispatcher; `status` is a pure function with no
//! dependencies beyond `lifecycle`/`runtime_event`; `worker` is the only
//! module that touches every other one.

pub mod config;
pub mod contracts;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod notifier;
pub mod parser;
pub mod queue;
pub mod runtime_event;
pub mod status;
pub mod team;
pub mod worker;

pub use config::EngineConfig;
pub use dispatcher::EventDispatcher;
pub use runtime_event::RuntimeEvent;
pub use status::Status;
pub use worker::{Worker, WorkerHandle};
