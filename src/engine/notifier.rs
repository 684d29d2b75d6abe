//! External event notifier (spec.md §4.7) — the observability layer a
//! running entity exposes to the outside world, and the bridge a team or
//! workflow uses to fan its members' notifications into one stream.
//!
//! Generalizes this ecosystem's `EventHandler`/`AgentEvent` pattern: one
//! trait with no-op default methods, wrapped in `Arc<dyn ...>` and shared
//! across every entity that needs to notify the same listener.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::engine::status::Status;

/// The wire record every external observer sees (spec §6, "Stream event
/// wire format"): `{entity_id, kind, status?, segment_id?, tool_name?,
/// payload, timestamp}`. Distinct from
/// [`RuntimeEvent`](crate::engine::runtime_event::RuntimeEvent), which is
/// internal and carries non-serializable payloads (`Arc<ToolInvocation>`,
/// etc).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    pub entity_id: String,
    pub kind: StreamEventKind,
    pub status: Option<String>,
    pub segment_id: Option<u64>,
    pub tool_name: Option<String>,
    pub payload: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `kind` enum per spec §6. `Truncated` is this crate's marker for the
/// cooperative-backpressure case (spec §4.7, "AgentEventStream") where a
/// slow consumer is told records were dropped rather than being blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    StatusChanged,
    AssistantChunk,
    SegmentEvent,
    ToolApprovalRequested,
    ToolApproved,
    ToolDenied,
    ToolExecutionStarted,
    ToolExecutionSucceeded,
    ToolExecutionFailed,
    ToolLog,
    Error,
    Truncated,
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Uninitialized => "uninitialized",
        Status::Bootstrapping => "bootstrapping",
        Status::Idle => "idle",
        Status::ProcessingUserInput => "processing_user_input",
        Status::AwaitingLlmResponse => "awaiting_llm_response",
        Status::AnalyzingLlmResponse => "analyzing_llm_response",
        Status::AwaitingToolApproval => "awaiting_tool_approval",
        Status::ExecutingTool => "executing_tool",
        Status::ProcessingToolResult => "processing_tool_result",
        Status::ToolDenied => "tool_denied",
        Status::ShuttingDown => "shutting_down",
        Status::ShutdownComplete => "shutdown_complete",
        Status::Error => "error",
    }
}

impl StreamEvent {
    pub fn status_changed(entity_id: &str, from: Status, to: Status, now: chrono::DateTime<chrono::Utc>) -> Self {
        StreamEvent {
            entity_id: entity_id.to_string(),
            kind: StreamEventKind::StatusChanged,
            status: Some(status_label(to).to_string()),
            segment_id: None,
            tool_name: None,
            payload: serde_json::json!({ "from": status_label(from), "to": status_label(to) }),
            timestamp: now,
        }
    }

    pub fn error(entity_id: &str, message: &str, now: chrono::DateTime<chrono::Utc>) -> Self {
        StreamEvent {
            entity_id: entity_id.to_string(),
            kind: StreamEventKind::Error,
            status: None,
            segment_id: None,
            tool_name: None,
            payload: serde_json::json!({ "message": message }),
            timestamp: now,
        }
    }
}

/// Receives [`StreamEvent`]s as an entity runs. Default methods are no-ops
/// so listeners only override what they care about (spec §4.7).
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn on_event(&self, event: &StreamEvent) {
        let _ = event;
    }
}

/// A notifier that does nothing; the default when no listener is attached.
pub struct NullNotifier;

#[async_trait]
impl EventNotifier for NullNotifier {
    async fn on_event(&self, _event: &StreamEvent) {}
}

/// Fans a single event out to every registered listener, in registration
/// order, awaiting each in turn (spec §4.7). Used by a team or workflow to
/// merge its members' individual notifiers into one externally observable
/// stream without each member needing to know about the others.
#[derive(Default, Clone)]
pub struct EventBridge {
    listeners: Vec<Arc<dyn EventNotifier>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, listener: Arc<dyn EventNotifier>) {
        self.listeners.push(listener);
    }

    pub async fn notify(&self, event: &StreamEvent) {
        for listener in &self.listeners {
            listener.on_event(event).await;
        }
    }
}

#[async_trait]
impl EventNotifier for EventBridge {
    async fn on_event(&self, event: &StreamEvent) {
        self.notify(event).await;
    }
}

/// Raw per-handler-invocation payload (spec §4.3), kept distinct from
/// [`StreamEvent`] because handlers may want the full untyped event data
/// (including fields the wire format omits) before it is narrowed.
pub type HandlerPayload = Value;

/// Subscribes to an entity's notifier and exposes its [`StreamEvent`]s to an
/// external consumer (CLI/TUI/RPC) over a bounded channel (spec §4.7,
/// "AgentEventStream"). Publishing never blocks the worker: a slow consumer
/// that lets the channel fill sees events silently dropped, and the next
/// successful send carries a synthetic `Truncated` marker in place of (not
/// in addition to) the event that would have overflowed, so the consumer
/// learns it missed something without the core ever waiting on it.
pub struct AgentEventStream {
    entity_id: String,
    tx: mpsc::Sender<StreamEvent>,
    lagging: std::sync::atomic::AtomicBool,
}

impl AgentEventStream {
    /// `capacity` bounds how many events the slowest consumer may lag behind
    /// before drops start (spec §5, "Stream consumers that fall behind
    /// receive truncation markers rather than forcing blocking in the
    /// worker").
    pub fn new(entity_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                entity_id: entity_id.into(),
                tx,
                lagging: std::sync::atomic::AtomicBool::new(false),
            },
            rx,
        )
    }

    fn truncated_marker(&self, event: &StreamEvent) -> StreamEvent {
        StreamEvent {
            entity_id: self.entity_id.clone(),
            kind: StreamEventKind::Truncated,
            status: None,
            segment_id: event.segment_id,
            tool_name: None,
            payload: Value::Null,
            timestamp: event.timestamp,
        }
    }
}

#[async_trait]
impl EventNotifier for AgentEventStream {
    async fn on_event(&self, event: &StreamEvent) {
        use std::sync::atomic::Ordering;

        // A consumer that is behind gets the *next* open slot filled with a
        // `Truncated` marker instead of the event that would have landed
        // there, rather than retrying the same send twice into a channel
        // that is still full (which would just drop the marker too).
        let to_send = if self.lagging.load(Ordering::Acquire) {
            self.truncated_marker(event)
        } else {
            event.clone()
        };
        let was_truncated = matches!(to_send.kind, StreamEventKind::Truncated);

        if self.tx.try_send(to_send).is_err() {
            log::warn!("stream consumer for {} lagging, dropping event", self.entity_id);
            self.lagging.store(true, Ordering::Release);
        } else if was_truncated {
            self.lagging.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl EventNotifier for Counter {
        async fn on_event(&self, _event: &StreamEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn bridge_fans_out_to_every_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bridge = EventBridge::new();
        bridge.attach(Arc::new(Counter(count.clone())));
        bridge.attach(Arc::new(Counter(count.clone())));

        let now = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
        bridge
            .notify(&StreamEvent::status_changed(
                "a1",
                Status::Idle,
                Status::ProcessingUserInput,
                now,
            ))
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lagging_consumer_sees_a_truncated_marker_instead_of_blocking() {
        let (stream, mut rx) = AgentEventStream::new("a1", 1);
        let now = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();

        // Fill the one-slot channel without ever reading it.
        stream
            .on_event(&StreamEvent::status_changed(
                "a1",
                Status::Idle,
                Status::ProcessingUserInput,
                now,
            ))
            .await;
        // The consumer is still behind, so this publish must not block; it
        // is dropped and the stream remembers it owes a Truncated marker.
        stream
            .on_event(&StreamEvent::error("a1", "boom", now))
            .await;

        let first = rx.try_recv().expect("first event delivered");
        assert_eq!(first.kind, StreamEventKind::StatusChanged);
        // The dropped error event never shows up directly.
        assert!(rx.try_recv().is_err());

        // Once the consumer drains a slot, the next publish fills it with
        // the owed Truncated marker rather than the fresh event itself.
        stream
            .on_event(&StreamEvent::status_changed(
                "a1",
                Status::ProcessingUserInput,
                Status::Idle,
                now,
            ))
            .await;
        let second = rx.try_recv().expect("truncated marker delivered");
        assert_eq!(second.kind, StreamEventKind::Truncated);

        // The lagging flag has now cleared; normal events flow again.
        stream
            .on_event(&StreamEvent::status_changed(
                "a1",
                Status::Idle,
                Status::ProcessingUserInput,
                now,
            ))
            .await;
        let third = rx.try_recv().expect("stream caught up");
        assert_eq!(third.kind, StreamEventKind::StatusChanged);
    }
}
