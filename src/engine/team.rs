//! Team and Workflow runtimes (spec.md §4.8).
//!
//! Identical in shape to the agent runtime but simpler: two input queues
//! (`user_message`, `internal_system`), no streaming tool-call parser, no
//! approval gating. What they add instead is coordinator routing between
//! children and a choice of task-notification mode.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::engine::dispatcher::{EntityContext, Senders};
use crate::engine::error::{HookError, QueueError};
use crate::engine::lifecycle::LifecycleRegistry;
use crate::engine::notifier::{EventBridge, EventNotifier, StreamEvent};
use crate::engine::queue::InputQueueSet;
use crate::engine::runtime_event::{QueueKind, RuntimeEvent};
use crate::engine::status::{derive_transition, Status};
use crate::engine::worker::WorkerHandle;

/// How a Team decides when a member agent should take its next turn (spec
/// §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskNotificationMode {
    /// The coordinator agent explicitly drives turn-taking.
    Manual,
    /// A task activator converts task-state changes into agent activations.
    SystemDriven,
}

/// Minimal dispatcher for the Team/Workflow tier: no tool lifecycle, no
/// parser — just status transitions plus routing (spec §4.8, "identical in
/// shape... but simpler").
pub struct TeamDispatcher {
    pub context: EntityContext,
    lifecycle: LifecycleRegistry,
    notifier: Arc<dyn EventNotifier>,
    manager: TeamManager,
}

impl TeamDispatcher {
    pub fn new(entity_id: impl Into<String>, notifier: Arc<dyn EventNotifier>, manager: TeamManager) -> Self {
        Self {
            context: EntityContext::new(entity_id),
            lifecycle: LifecycleRegistry::new(),
            notifier,
            manager,
        }
    }

    pub async fn dispatch(&mut self, event: RuntimeEvent) {
        if let Some((next, lifecycle_event)) = derive_transition(self.context.status, &event) {
            let previous = self.context.status;
            self.lifecycle.fire_hooks(previous, next, &serde_json::Value::Null).await;
            if let Some(lifecycle_event) = lifecycle_event {
                self.lifecycle
                    .fire_processors(lifecycle_event, &serde_json::Value::Null)
                    .await;
            }
            self.context.status = next;
            self.notifier
                .on_event(&StreamEvent::status_changed(
                    &self.context.entity_id,
                    previous,
                    next,
                    chrono::Utc::now(),
                ))
                .await;
        }

        if let Err(err) = self.route(event).await {
            log::error!("team handler failed for {}: {}", self.context.entity_id, err);
            self.notifier
                .on_event(&StreamEvent::error(&self.context.entity_id, &err.to_string(), chrono::Utc::now()))
                .await;
            self.context.status = Status::Error;
        }
    }

    async fn route(&mut self, event: RuntimeEvent) -> Result<(), HookError> {
        match event {
            RuntimeEvent::UserMessageReceived { content } => {
                // Messages addressed to the team are enqueued to the
                // coordinator agent (spec §4.8, "Coordinator routing").
                self.manager
                    .route_to_coordinator(content)
                    .await
                    .map_err(|e| HookError(e.to_string()))
            }
            RuntimeEvent::InterAgentMessageRequest { from_agent_id, content } => self
                .manager
                .dispatch_send_message_to(&from_agent_id, content)
                .await
                .map_err(|e| HookError(e.to_string())),
            RuntimeEvent::InternalSystem { tag, payload } if tag == "task_state_changed" => self
                .manager
                .activate_on_task_state_change(payload.as_ref())
                .await
                .map_err(|e| HookError(e.to_string())),
            RuntimeEvent::AgentError { message } => Err(HookError(message)),
            _ => Ok(()),
        }
    }
}

/// Routes messages addressed to the team (or between its members) to the
/// right child worker, and translates `send_message_to` tool calls into
/// `InterAgentMessageRequest` events on the recipient's input queue (spec
/// §4.8).
pub struct TeamManager {
    coordinator_id: String,
    members: HashMap<String, WorkerHandle>,
    mode: TaskNotificationMode,
}

impl TeamManager {
    pub fn new(coordinator_id: impl Into<String>, mode: TaskNotificationMode) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            members: HashMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> TaskNotificationMode {
        self.mode
    }

    /// The `SystemDriven` task activator (spec §4.8): a task-state change is
    /// delivered as an `InternalSystem{tag: "task_state_changed"}` event
    /// carrying `{"agent_id", "content"}`, and activates that member by
    /// enqueuing a `UserMessageReceived` on its behalf. Under `Manual` mode
    /// turn-taking stays the coordinator's job, so this is a no-op.
    pub async fn activate_on_task_state_change(&self, payload: Option<&Value>) -> Result<(), QueueError> {
        if self.mode != TaskNotificationMode::SystemDriven {
            return Ok(());
        }
        let Some(payload) = payload else {
            log::warn!("task_state_changed with no payload, nothing to activate");
            return Ok(());
        };
        let Some(agent_id) = payload.get("agent_id").and_then(|v| v.as_str()) else {
            log::warn!("task_state_changed payload missing agent_id");
            return Ok(());
        };
        let content = payload
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let handle = self.members.get(agent_id).ok_or(QueueError::WorkerStopped)?;
        handle.submit(RuntimeEvent::UserMessageReceived { content }).await
    }

    pub fn add_member(&mut self, agent_id: impl Into<String>, handle: WorkerHandle) {
        self.members.insert(agent_id.into(), handle);
    }

    pub fn remove_member(&mut self, agent_id: &str) {
        self.members.remove(agent_id);
    }

    async fn route_to_coordinator(&self, content: String) -> Result<(), QueueError> {
        let handle = self
            .members
            .get(&self.coordinator_id)
            .ok_or(QueueError::WorkerStopped)?;
        handle.submit(RuntimeEvent::UserMessageReceived { content }).await
    }

    /// Translates one member's `send_message_to` tool call into an
    /// `InterAgentMessageRequest` delivered to the recipient's input queue
    /// (spec §4.8). `content` is expected to carry `"<recipient_id>\u{1}<body>"`
    /// produced by the calling tool adapter; callers that already have the
    /// parsed pair should call [`send_message_to`](Self::send_message_to)
    /// directly instead.
    async fn dispatch_send_message_to(&self, from_agent_id: &str, content: String) -> Result<(), QueueError> {
        let mut parts = content.splitn(2, '\u{1}');
        let recipient = parts.next().unwrap_or_default().to_string();
        let body = parts.next().unwrap_or_default().to_string();
        self.send_message_to(from_agent_id, &recipient, body).await
    }

    pub async fn send_message_to(
        &self,
        from_agent_id: &str,
        recipient_id: &str,
        content: String,
    ) -> Result<(), QueueError> {
        let handle = self.members.get(recipient_id).ok_or(QueueError::WorkerStopped)?;
        handle
            .submit(RuntimeEvent::InterAgentMessageRequest {
                from_agent_id: from_agent_id.to_string(),
                content,
            })
            .await
    }
}

/// Owns one [`EventBridge`] per team/workflow, fanning every member's
/// `StreamEvent`s into the parent's own notifier while their `entity_id`
/// already carries the child's identity (spec §4.8, "Multiplexer").
/// Subscription lifetime equals child lifetime: dropping the bridge (e.g.
/// when the team's `Worker` tears down) stops forwarding for every member
/// that shared it.
#[derive(Clone, Default)]
pub struct TeamMultiplexer {
    bridge: EventBridge,
}

impl TeamMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared notifier every child worker should be constructed with so
    /// its events flow through this multiplexer.
    pub fn child_notifier(&self) -> Arc<dyn EventNotifier> {
        Arc::new(self.bridge.clone())
    }

    /// Attach an external listener (CLI/TUI/RPC stream) that should see
    /// every child's events merged with the team's own.
    pub fn attach_listener(&mut self, listener: Arc<dyn EventNotifier>) {
        self.bridge.attach(listener);
    }
}

/// Builds the two-queue `InputQueueSet` a Team/Workflow worker needs (spec
/// §3: `user_message`, `internal_system` only).
pub fn team_queue_kinds() -> Vec<QueueKind> {
    QueueKind::TEAM_PRIORITY_ORDER.to_vec()
}

pub type TeamQueueSet = InputQueueSet<RuntimeEvent>;

/// Minimal sender bundle used when wiring a [`TeamDispatcher`] the same way
/// [`Senders`](crate::engine::dispatcher::Senders) wires the agent
/// dispatcher, but only the two lanes a Team/Workflow actually has.
#[derive(Clone)]
pub struct TeamSenders {
    pub user_message: tokio::sync::mpsc::Sender<RuntimeEvent>,
    pub internal_system: tokio::sync::mpsc::Sender<RuntimeEvent>,
}

impl From<Senders> for TeamSenders {
    fn from(senders: Senders) -> Self {
        TeamSenders {
            user_message: senders.user_message,
            internal_system: senders.internal_system,
        }
    }
}

/// Spawns a Team/Workflow's own private event loop (spec §4.2, simplified
/// per §4.8: two queues, no bootstrap steps, no tool lifecycle). Returns a
/// handle for submitting `UserMessageReceived`/`InternalSystem` events and
/// requesting a stop, mirroring [`Worker::spawn`](crate::engine::worker::Worker::spawn).
pub fn spawn_team_worker(
    entity_id: impl Into<String>,
    queue_capacity: usize,
    wait_timeout: std::time::Duration,
    mut dispatcher: TeamDispatcher,
) -> WorkerHandle {
    use std::sync::atomic::{AtomicBool, Ordering};

    let entity_id = entity_id.into();
    let (mut queues, sender_pairs) = InputQueueSet::<RuntimeEvent>::new(&team_queue_kinds(), queue_capacity);
    let find = |kind: QueueKind| {
        sender_pairs
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, tx)| tx.clone())
    };
    let senders = Senders {
        user_message: find(QueueKind::UserMessage).expect("user_message queue registered"),
        internal_system: find(QueueKind::InternalSystem).expect("internal_system queue registered"),
        tool_invocation_request: find(QueueKind::UserMessage).unwrap(),
        tool_result: find(QueueKind::UserMessage).unwrap(),
        tool_approval: find(QueueKind::UserMessage).unwrap(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handle = WorkerHandle::from_senders(senders, stop.clone());

    tokio::spawn(async move {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match queues.next(wait_timeout).await {
                Some(event) => dispatcher.dispatch(event).await,
                None => continue,
            }
        }
        dispatcher.dispatch(RuntimeEvent::AgentStopped).await;
        log::info!("team/workflow worker '{}' shut down", entity_id);
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::notifier::NullNotifier;
    use crate::engine::worker::Worker;
    use std::time::Duration;

    fn noop_dispatcher_factory(
        entity_id: &'static str,
    ) -> impl FnOnce(Senders) -> crate::engine::dispatcher::EventDispatcher {
        move |senders| {
            let registry = crate::engine::handlers::ToolRegistry::new();
            let tools = crate::engine::handlers::ToolHandlers::new(
                entity_id,
                registry,
                Arc::new(NullNotifier),
                senders.tool_invocation_request.clone(),
                senders.tool_result.clone(),
                senders.user_message.clone(),
            );
            crate::engine::dispatcher::EventDispatcher::new(
                entity_id,
                LifecycleRegistry::new(),
                Arc::new(NullNotifier),
                None,
                None,
                crate::engine::parser::ParserStrategy::ApiToolCall,
                crate::engine::parser::ToolSyntaxRegistry::new(),
                tools,
                senders,
            )
        }
    }

    #[tokio::test]
    async fn scenario_e_style_routing_to_coordinator_and_member() {
        let coordinator_worker = Worker::new(
            "coordinator",
            QueueKind::AGENT_PRIORITY_ORDER.to_vec(),
            16,
            Duration::from_millis(20),
            Arc::new(NullNotifier),
            noop_dispatcher_factory("coordinator"),
        );
        let member_worker = Worker::new(
            "member-a",
            QueueKind::AGENT_PRIORITY_ORDER.to_vec(),
            16,
            Duration::from_millis(20),
            Arc::new(NullNotifier),
            noop_dispatcher_factory("member-a"),
        );

        let coordinator_handle = coordinator_worker.spawn();
        let member_handle = member_worker.spawn();

        let mut manager = TeamManager::new("coordinator", TaskNotificationMode::Manual);
        manager.add_member("coordinator", coordinator_handle.clone());
        manager.add_member("member-a", member_handle.clone());

        manager
            .route_to_coordinator("hello team".to_string())
            .await
            .expect("coordinator accepts routed message");
        manager
            .send_message_to("coordinator", "member-a", "delegate this".to_string())
            .await
            .expect("member accepts inter-agent message");

        coordinator_handle.request_stop();
        member_handle.request_stop();
    }

    #[tokio::test]
    async fn system_driven_mode_activates_named_member_on_task_state_change() {
        let member_worker = Worker::new(
            "member-a",
            QueueKind::AGENT_PRIORITY_ORDER.to_vec(),
            16,
            Duration::from_millis(20),
            Arc::new(NullNotifier),
            noop_dispatcher_factory("member-a"),
        );
        let member_handle = member_worker.spawn();

        let mut manager = TeamManager::new("coordinator", TaskNotificationMode::SystemDriven);
        manager.add_member("member-a", member_handle.clone());

        manager
            .activate_on_task_state_change(Some(&serde_json::json!({
                "agent_id": "member-a",
                "content": "task moved to in_progress",
            })))
            .await
            .expect("system-driven mode activates a known member");

        member_handle.request_stop();
    }

    #[tokio::test]
    async fn manual_mode_ignores_task_state_change() {
        let manager = TeamManager::new("coordinator", TaskNotificationMode::Manual);
        // No members registered at all: if this were wired through it would
        // fail with QueueError::WorkerStopped. Manual mode must no-op instead.
        manager
            .activate_on_task_state_change(Some(&serde_json::json!({
                "agent_id": "member-a",
                "content": "task moved to in_progress",
            })))
            .await
            .expect("manual mode does not attempt activation");
    }
}
