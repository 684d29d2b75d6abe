//! Worker and runtime (spec.md §4.2): owns the private event loop, drives
//! bootstrap, pumps the main loop, and drives shutdown.
//!
//! One [`Worker`] exists per entity (agent, team, or workflow) and is the
//! only thing that ever touches that entity's [`InputQueueSet`] or
//! [`EventDispatcher`] (spec §5, "Concurrency contract"). It is spawned onto
//! its own `tokio::task`, which this crate treats as the entity's private
//! OS-thread-equivalent worker per spec's cooperative-scheduler model —
//! `tokio::task::spawn` gives one logical worker per entity without this
//! crate having to manage raw threads itself, matching how the rest of this
//! repository (`Agent`, `Orchestration`) already builds on `tokio`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::dispatcher::{EventDispatcher, Senders};
use crate::engine::error::BootstrapError;
use crate::engine::notifier::{EventNotifier, StreamEvent};
use crate::engine::queue::InputQueueSet;
use crate::engine::runtime_event::{QueueKind, RuntimeEvent};
use crate::engine::status::Status;

/// One ordered bootstrap or shutdown step (spec §4.2). Implementations wrap
/// workspace preparation, MCP/tool pre-warming, system-prompt processors, or
/// the shutdown orchestrator's cleanup/flush/deregister actions.
#[async_trait]
pub trait WorkerStep: Send + Sync {
    fn label(&self) -> &str;
    async fn run(&self) -> Result<(), BootstrapError>;
}

/// A `WorkerStep` built from a plain async closure, for embedders who don't
/// need a dedicated type.
pub struct FnStep<F> {
    label: String,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self { label: label.into(), f }
    }
}

#[async_trait]
impl<F, Fut> WorkerStep for FnStep<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), BootstrapError>> + Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self) -> Result<(), BootstrapError> {
        (self.f)().await
    }
}

/// Handle returned to whoever spawns a [`Worker`]: lets the owner submit
/// events cross-thread and request a stop (spec §4.1, "Cross-thread
/// submission"; §4.2, "Shutdown").
#[derive(Clone)]
pub struct WorkerHandle {
    senders: Senders,
    stop: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Build a handle directly from an already-constructed sender bundle and
    /// stop flag, for runtimes (e.g. Team/Workflow) that assemble their own
    /// worker loop instead of going through [`Worker::spawn`].
    pub fn from_senders(senders: Senders, stop: Arc<AtomicBool>) -> Self {
        Self { senders, stop }
    }

    pub async fn submit(&self, event: RuntimeEvent) -> Result<(), crate::engine::error::QueueError> {
        let sender = match event.queue_kind() {
            QueueKind::UserMessage | QueueKind::InterAgentMessage => &self.senders.user_message,
            QueueKind::ToolInvocationRequest => &self.senders.tool_invocation_request,
            QueueKind::ToolResult => &self.senders.tool_result,
            QueueKind::ToolApproval => &self.senders.tool_approval,
            QueueKind::InternalSystem => &self.senders.internal_system,
        };
        sender
            .try_send(event)
            .map_err(|_| crate::engine::error::QueueError::WorkerStopped)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Owns the private event loop for one entity (spec §4.2).
pub struct Worker {
    entity_id: String,
    queue_kinds: Vec<QueueKind>,
    queue_capacity: usize,
    queue_wait_timeout: Duration,
    bootstrap_steps: Vec<Box<dyn WorkerStep>>,
    shutdown_steps: Vec<Box<dyn WorkerStep>>,
    notifier: Arc<dyn EventNotifier>,
    dispatcher_factory: Box<dyn FnOnce(Senders) -> EventDispatcher + Send>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        entity_id: impl Into<String>,
        queue_kinds: Vec<QueueKind>,
        queue_capacity: usize,
        queue_wait_timeout: Duration,
        notifier: Arc<dyn EventNotifier>,
        dispatcher_factory: impl FnOnce(Senders) -> EventDispatcher + Send + 'static,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            queue_kinds,
            queue_capacity,
            queue_wait_timeout,
            bootstrap_steps: Vec::new(),
            shutdown_steps: Vec::new(),
            notifier,
            dispatcher_factory: Box::new(dispatcher_factory),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_bootstrap_step(mut self, step: Box<dyn WorkerStep>) -> Self {
        self.bootstrap_steps.push(step);
        self
    }

    pub fn with_shutdown_step(mut self, step: Box<dyn WorkerStep>) -> Self {
        self.shutdown_steps.push(step);
        self
    }

    /// Build the queue set and hand back a [`WorkerHandle`] before the loop
    /// starts running, so the caller can submit the first `UserMessageReceived`
    /// without racing bootstrap.
    pub fn spawn(mut self) -> WorkerHandle {
        let (queues, sender_pairs) =
            InputQueueSet::<RuntimeEvent>::new(&self.queue_kinds, self.queue_capacity);
        let senders = senders_from_pairs(sender_pairs);
        let handle = WorkerHandle {
            senders: senders.clone(),
            stop: self.stop.clone(),
        };

        let stop = self.stop.clone();
        let notifier = self.notifier.clone();
        let entity_id = self.entity_id.clone();
        let timeout = self.queue_wait_timeout;
        let bootstrap_steps = std::mem::take(&mut self.bootstrap_steps);
        let shutdown_steps = std::mem::take(&mut self.shutdown_steps);
        let dispatcher_factory = self.dispatcher_factory;

        tokio::spawn(async move {
            let mut dispatcher = dispatcher_factory(senders.clone());
            run_worker_loop(
                &entity_id,
                queues,
                &mut dispatcher,
                bootstrap_steps,
                shutdown_steps,
                notifier,
                stop,
                timeout,
                senders,
            )
            .await;
        });

        handle
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker_loop(
    entity_id: &str,
    mut queues: InputQueueSet<RuntimeEvent>,
    dispatcher: &mut EventDispatcher,
    bootstrap_steps: Vec<Box<dyn WorkerStep>>,
    shutdown_steps: Vec<Box<dyn WorkerStep>>,
    notifier: Arc<dyn EventNotifier>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
    senders: Senders,
) {
    dispatcher.context.status = Status::Bootstrapping;

    for step in &bootstrap_steps {
        if let Err(err) = step.run().await {
            log::error!("bootstrap step '{}' failed for {}: {}", step.label(), entity_id, err);
            dispatcher.context.status = Status::Error;
            notifier
                .on_event(&StreamEvent::error(entity_id, &err.to_string(), chrono::Utc::now()))
                .await;
            run_shutdown(entity_id, dispatcher, &shutdown_steps, &notifier).await;
            return;
        }
    }

    let _ = senders.internal_system.send(RuntimeEvent::AgentReady).await;

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match queues.next(timeout).await {
            Some(event) => dispatcher.dispatch(event).await,
            None => continue,
        }
    }

    dispatcher.dispatch(RuntimeEvent::AgentStopped).await;
    // Drain anything still buffered so in-flight tool results aren't lost
    // mid-shutdown (best effort: one more pass with no wait).
    while let Some(event) = queues.next(Duration::from_millis(0)).await {
        dispatcher.dispatch(event).await;
    }

    run_shutdown(entity_id, dispatcher, &shutdown_steps, &notifier).await;
}

async fn run_shutdown(
    entity_id: &str,
    dispatcher: &mut EventDispatcher,
    shutdown_steps: &[Box<dyn WorkerStep>],
    notifier: &Arc<dyn EventNotifier>,
) {
    // The normal-exit path already reached `ShuttingDown` by dispatching
    // `AgentStopped` before calling this function; the bootstrap-failure
    // path has not, since it jumps here straight from `Error`. Either way,
    // `ShuttingDown` must be visited before `ShutdownComplete` (spec §8,
    // Scenario F).
    let previous = dispatcher.context.status;
    if previous != Status::ShuttingDown {
        dispatcher.context.status = Status::ShuttingDown;
        notifier
            .on_event(&StreamEvent::status_changed(
                entity_id,
                previous,
                Status::ShuttingDown,
                chrono::Utc::now(),
            ))
            .await;
    }

    for step in shutdown_steps {
        if let Err(err) = step.run().await {
            log::warn!("shutdown step '{}' failed for {}: {}", step.label(), entity_id, err);
        }
    }
    let previous = dispatcher.context.status;
    dispatcher.context.status = Status::ShutdownComplete;
    notifier
        .on_event(&StreamEvent::status_changed(
            entity_id,
            previous,
            Status::ShutdownComplete,
            chrono::Utc::now(),
        ))
        .await;
}

fn senders_from_pairs(pairs: Vec<(QueueKind, mpsc::Sender<RuntimeEvent>)>) -> Senders {
    let find = |kind: QueueKind| {
        pairs
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, tx)| tx.clone())
    };
    Senders {
        user_message: find(QueueKind::UserMessage).expect("user_message queue registered"),
        tool_invocation_request: find(QueueKind::ToolInvocationRequest)
            .unwrap_or_else(|| find(QueueKind::UserMessage).unwrap()),
        tool_result: find(QueueKind::ToolResult)
            .unwrap_or_else(|| find(QueueKind::UserMessage).unwrap()),
        tool_approval: find(QueueKind::ToolApproval)
            .unwrap_or_else(|| find(QueueKind::UserMessage).unwrap()),
        internal_system: find(QueueKind::InternalSystem).expect("internal_system queue registered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::contracts::Tool;
    use crate::engine::dispatcher::EventDispatcher;
    use crate::engine::handlers::{ToolHandlers, ToolRegistry};
    use crate::engine::lifecycle::LifecycleRegistry;
    use crate::engine::parser::{ParserStrategy, ToolSyntaxRegistry};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "write_file"
        }
        async fn execute(
            &self,
            _ctx: &crate::engine::contracts::CallContext,
            args: &Value,
        ) -> Result<Value, crate::engine::contracts::ContractError> {
            Ok(args.clone())
        }
    }

    #[tokio::test]
    async fn scenario_f_bootstrap_failure_reaches_shutdown_complete_without_agent_ready() {
        let config = EngineConfig::default();
        let ready_seen = Arc::new(AtomicUsize::new(0));
        let ready_seen_clone = ready_seen.clone();
        let status_walk = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let status_walk_clone = status_walk.clone();

        struct ReadyCounter(Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<String>>>);
        #[async_trait]
        impl EventNotifier for ReadyCounter {
            async fn on_event(&self, event: &StreamEvent) {
                if matches!(event.kind, crate::engine::notifier::StreamEventKind::StatusChanged) {
                    if event.status.as_deref() == Some("idle") {
                        self.0.fetch_add(1, Ordering::SeqCst);
                    }
                    if let Some(to) = event.status.clone() {
                        self.1.lock().unwrap().push(to);
                    }
                }
            }
        }
        let counting_notifier: Arc<dyn EventNotifier> =
            Arc::new(ReadyCounter(ready_seen_clone, status_walk_clone));

        let worker = Worker::new(
            "agent-f",
            QueueKind::AGENT_PRIORITY_ORDER.to_vec(),
            config.queue_capacity,
            Duration::from_millis(20),
            counting_notifier.clone(),
            move |senders| {
                let mut registry = ToolRegistry::new();
                registry.register(Arc::new(EchoTool));
                let tools = ToolHandlers::new(
                    "agent-f",
                    registry,
                    counting_notifier.clone(),
                    senders.tool_invocation_request.clone(),
                    senders.tool_result.clone(),
                    senders.user_message.clone(),
                );
                EventDispatcher::new(
                    "agent-f",
                    LifecycleRegistry::new(),
                    counting_notifier,
                    None,
                    None,
                    ParserStrategy::ApiToolCall,
                    ToolSyntaxRegistry::new(),
                    tools,
                    senders,
                )
            },
        )
        .with_bootstrap_step(Box::new(FnStep::new("system_prompt", || async {
            Err(BootstrapError::SystemPromptProcessor("raised".to_string()))
        })));

        let handle = worker.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.request_stop();

        assert_eq!(ready_seen.load(Ordering::SeqCst), 0);
        // Scenario F (spec §8): BOOTSTRAPPING -> ERROR -> SHUTTING_DOWN ->
        // SHUTDOWN_COMPLETE, with no status_changed jump straight from
        // ERROR to SHUTDOWN_COMPLETE.
        let walk = status_walk.lock().unwrap().clone();
        assert_eq!(walk, vec!["shutting_down", "shutdown_complete"]);
    }
}
