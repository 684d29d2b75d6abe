//! Lifecycle events, hooks, and processors (spec.md §3, §4.3, §4.4).

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::error::HookError;
use crate::engine::status::Status;

/// Transition tag fired at specific status-transition boundaries (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    AgentReady,
    BeforeLlmCall,
    AfterLlmResponse,
    BeforeToolExecute,
    AfterToolExecute,
}

/// Declares `source_status`, `target_status`, and a blocking `execute`
/// (spec §3). Hooks fire on the specific `(source, target)` pair they
/// register for; the worker awaits them, and a failure is caught and
/// logged without aborting the transition (spec §4.3).
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn source_status(&self) -> Status;
    fn target_status(&self) -> Status;
    async fn execute(&self, event_data: &Value) -> Result<(), HookError>;
}

/// Declares a single `event` and a blocking `process` keyed by the derived
/// [`LifecycleEvent`] rather than a `(source, target)` pair (spec §3).
#[async_trait]
pub trait LifecycleProcessor: Send + Sync {
    fn event(&self) -> LifecycleEvent;
    async fn process(&self, event_data: &Value) -> Result<(), HookError>;
}

/// Owns the registered hooks/processors for one entity and fires the ones
/// matching a given transition, catching and logging failures per spec §4.3
/// ("exceptions are caught per hook and logged without aborting the
/// transition").
#[derive(Default)]
pub struct LifecycleRegistry {
    hooks: Vec<Box<dyn LifecycleHook>>,
    processors: Vec<Box<dyn LifecycleProcessor>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&mut self, hook: Box<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    pub fn add_processor(&mut self, processor: Box<dyn LifecycleProcessor>) {
        self.processors.push(processor);
    }

    /// Fire every hook registered for `(source, target)`, in registration
    /// order. Errors are logged, not propagated.
    pub async fn fire_hooks(&self, source: Status, target: Status, event_data: &Value) {
        for hook in &self.hooks {
            if hook.source_status() == source && hook.target_status() == target {
                if let Err(err) = hook.execute(event_data).await {
                    log::warn!(
                        "lifecycle hook {:?}->{:?} failed: {}",
                        source,
                        target,
                        err
                    );
                }
            }
        }
    }

    /// Fire every processor registered for `lifecycle_event`, in
    /// registration order.
    pub async fn fire_processors(&self, lifecycle_event: LifecycleEvent, event_data: &Value) {
        for processor in &self.processors {
            if processor.event() == lifecycle_event {
                if let Err(err) = processor.process(event_data).await {
                    log::warn!(
                        "lifecycle processor for {:?} failed: {}",
                        lifecycle_event,
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook {
        source: Status,
        target: Status,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        fn source_status(&self) -> Status {
            self.source
        }
        fn target_status(&self) -> Status {
            self.target
        }
        async fn execute(&self, _event_data: &Value) -> Result<(), HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHook {
        source: Status,
        target: Status,
    }

    #[async_trait]
    impl LifecycleHook for FailingHook {
        fn source_status(&self) -> Status {
            self.source
        }
        fn target_status(&self) -> Status {
            self.target
        }
        async fn execute(&self, _event_data: &Value) -> Result<(), HookError> {
            Err(HookError("boom".to_string()))
        }
    }

    struct CountingProcessor {
        event: LifecycleEvent,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LifecycleProcessor for CountingProcessor {
        fn event(&self) -> LifecycleEvent {
            self.event
        }
        async fn process(&self, _event_data: &Value) -> Result<(), HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn fire_hooks_only_matches_registered_source_target_pair() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = LifecycleRegistry::new();
        registry.add_hook(Box::new(CountingHook {
            source: Status::Idle,
            target: Status::ProcessingUserInput,
            calls: calls.clone(),
        }));
        registry.add_hook(Box::new(CountingHook {
            source: Status::ProcessingUserInput,
            target: Status::AwaitingLlmResponse,
            calls: calls.clone(),
        }));

        registry
            .fire_hooks(Status::Idle, Status::ProcessingUserInput, &Value::Null)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failing_hook_is_logged_and_does_not_stop_remaining_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = LifecycleRegistry::new();
        registry.add_hook(Box::new(FailingHook {
            source: Status::Idle,
            target: Status::ProcessingUserInput,
        }));
        registry.add_hook(Box::new(CountingHook {
            source: Status::Idle,
            target: Status::ProcessingUserInput,
            calls: calls.clone(),
        }));

        registry
            .fire_hooks(Status::Idle, Status::ProcessingUserInput, &Value::Null)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fire_processors_dispatches_by_lifecycle_event_not_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = LifecycleRegistry::new();
        registry.add_processor(Box::new(CountingProcessor {
            event: LifecycleEvent::BeforeToolExecute,
            calls: calls.clone(),
        }));
        registry.add_processor(Box::new(CountingProcessor {
            event: LifecycleEvent::AfterToolExecute,
            calls: calls.clone(),
        }));

        registry
            .fire_processors(LifecycleEvent::BeforeToolExecute, &Value::Null)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
