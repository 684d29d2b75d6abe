//! Tool invocation lifecycle handlers (spec.md §4.6).
//!
//! Covers the full flow from a parser-emitted `PendingToolInvocation`
//! through approval gating, execution, and multi-turn result aggregation.
//! Grounded in the same shape as this repository's existing tool-call loop
//! in `Agent::generate_with_tokens` (detect → execute → feed result back to
//! the LLM), generalized into discrete, queue-driven steps so each step can
//! be preempted by higher-priority events per spec §4.1.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::contracts::{CallContext, Tool};
use crate::engine::error::ToolError;
use crate::engine::notifier::{EventNotifier, StreamEvent, StreamEventKind};
use crate::engine::parser::ToolInvocation;
use crate::engine::runtime_event::{AggregatedToolResult, RuntimeEvent};

/// Case-insensitive lookup of tools by name (spec §4.5, §6 "Tool contract").
/// Constructed once at entity bootstrap and shared for the entity's
/// lifetime; re-registration is an explicit operation, not implicit
/// reflection (spec §9, "Global singletons... process-wide state with
/// explicit lifecycle").
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_lowercase(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }
}

/// Accumulates results for every tool invocation emitted during one LLM
/// turn, reorders them to the parser-emission sequence once all have
/// settled, and hands back a single synthetic aggregate (spec §4.6,
/// "Multi-turn aggregation").
///
/// Only one turn is ever open at a time: a new turn cannot begin until the
/// entity returns to `Idle`, and an entity has exactly one worker (spec
/// §5), so there is no concurrent-turn case to guard against.
#[derive(Default)]
struct PendingTurn {
    order: Vec<u64>,
    results: HashMap<u64, AggregatedToolResult>,
}

#[derive(Default)]
pub struct ToolResultAggregator {
    turn: Option<PendingTurn>,
    /// Invocation ids that have already received a result, kept across
    /// turns so a stray duplicate delivered after its turn closed is still
    /// caught (spec §8, "Duplicate ToolResult for a known id is dropped and
    /// logged").
    settled: HashSet<u64>,
}

impl ToolResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new turn with the invocations in parser-emission order (spec
    /// §4.6, "reorder them to match the parser-emitted sequence").
    pub fn begin_turn(&mut self, order: Vec<u64>) {
        self.turn = Some(PendingTurn {
            order,
            results: HashMap::new(),
        });
    }

    /// Record one settled result. Returns `Some(results)` in emission order
    /// once every invocation of the open turn has reported, or `None` while
    /// the turn is still waiting. A duplicate or untracked id is logged and
    /// dropped.
    pub fn record(&mut self, id: u64, result: AggregatedToolResult) -> Option<Vec<AggregatedToolResult>> {
        if !self.settled.insert(id) {
            log::warn!("duplicate ToolResult for invocation {} dropped", id);
            return None;
        }

        let turn = self.turn.as_mut()?;
        if !turn.order.contains(&id) {
            log::warn!("ToolResult for invocation {} does not belong to the open turn", id);
            return None;
        }
        turn.results.insert(id, result);

        if turn.results.len() < turn.order.len() {
            return None;
        }

        let turn = self.turn.take().unwrap();
        Some(
            turn.order
                .into_iter()
                .filter_map(|id| turn.results.get(&id).cloned())
                .collect(),
        )
    }
}

/// Renders an aggregated multi-tool result into the synthetic `sender=TOOL`
/// message content fed back to the LLM (spec §4.6). Kept as plain text so it
/// composes with whatever message envelope the embedding memory/LLM layer
/// uses; the structured fields remain available to callers that want JSON
/// instead via [`aggregate_to_json`].
pub fn aggregate_to_text(results: &[AggregatedToolResult]) -> String {
    let mut out = String::new();
    for result in results {
        if result.is_denied {
            out.push_str(&format!(
                "[tool:{} id:{}] denied: {}\n",
                result.tool_name,
                result.invocation_id,
                result.error.as_deref().unwrap_or("no reason given")
            ));
        } else if let Some(err) = &result.error {
            out.push_str(&format!(
                "[tool:{} id:{}] error: {}\n",
                result.tool_name, result.invocation_id, err
            ));
        } else {
            out.push_str(&format!(
                "[tool:{} id:{}] result: {}\n",
                result.tool_name,
                result.invocation_id,
                result.output.clone().unwrap_or(Value::Null)
            ));
        }
    }
    out
}

pub fn aggregate_to_json(results: &[AggregatedToolResult]) -> Value {
    Value::Array(
        results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "invocation_id": r.invocation_id,
                    "tool_name": r.tool_name,
                    "is_denied": r.is_denied,
                    "error": r.error,
                    "output": r.output,
                })
            })
            .collect(),
    )
}

/// Handles the tool invocation lifecycle for one entity (spec §4.6): stores
/// invocations awaiting approval, dispatches execution as background tasks
/// so slow tools don't block the worker (spec §5: execution completion
/// order is independent of dispatch order — see scenario C), and settles
/// results through the aggregator.
pub struct ToolHandlers {
    entity_id: String,
    registry: ToolRegistry,
    pending_approvals: HashMap<u64, Arc<ToolInvocation>>,
    aggregator: ToolResultAggregator,
    notifier: Arc<dyn EventNotifier>,
    tool_invocation_tx: mpsc::Sender<RuntimeEvent>,
    tool_result_tx: mpsc::Sender<RuntimeEvent>,
    user_message_tx: mpsc::Sender<RuntimeEvent>,
}

impl ToolHandlers {
    pub fn new(
        entity_id: impl Into<String>,
        registry: ToolRegistry,
        notifier: Arc<dyn EventNotifier>,
        tool_invocation_tx: mpsc::Sender<RuntimeEvent>,
        tool_result_tx: mpsc::Sender<RuntimeEvent>,
        user_message_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            registry,
            pending_approvals: HashMap::new(),
            aggregator: ToolResultAggregator::new(),
            notifier,
            tool_invocation_tx,
            tool_result_tx,
            user_message_tx,
        }
    }

    /// Called once per turn, before the first `PendingToolInvocation` of
    /// that turn is dispatched, with every invocation id the turn will
    /// produce, in parser-emission order (spec §4.6 aggregation).
    pub fn begin_turn(&mut self, invocation_ids: Vec<u64>) {
        self.aggregator.begin_turn(invocation_ids);
    }

    async fn notify(&self, kind: StreamEventKind, segment_id: Option<u64>, tool_name: Option<&str>, payload: Value) {
        let event = StreamEvent {
            entity_id: self.entity_id.clone(),
            kind,
            status: None,
            segment_id,
            tool_name: tool_name.map(|s| s.to_string()),
            payload,
            timestamp: now(),
        };
        self.notifier.on_event(&event).await;
    }

    /// Request handler (spec §4.6, "Flow (auto-execute off/on)").
    pub async fn handle_pending_tool_invocation(&mut self, invocation: Arc<ToolInvocation>, auto_execute: bool) {
        if auto_execute {
            let _ = self
                .tool_invocation_tx
                .send(RuntimeEvent::ExecuteToolInvocation {
                    invocation: invocation.clone(),
                })
                .await;
            return;
        }

        self.pending_approvals.insert(invocation.id, invocation.clone());
        self.notify(
            StreamEventKind::ToolApprovalRequested,
            Some(invocation.id),
            Some(&invocation.tool_name),
            serde_json::json!({ "arguments": invocation.arguments }),
        )
        .await;
    }

    /// Approval handler (spec §4.6).
    pub async fn handle_tool_execution_approval(
        &mut self,
        invocation_id: &str,
        approved: bool,
        reason: Option<String>,
    ) {
        let id: u64 = match invocation_id.parse() {
            Ok(id) => id,
            Err(_) => {
                log::warn!("tool approval for non-numeric invocation id {}", invocation_id);
                return;
            }
        };
        let Some(invocation) = self.pending_approvals.remove(&id) else {
            log::warn!("approval decision for unknown invocation {}", id);
            return;
        };

        if approved {
            self.notify(
                StreamEventKind::ToolApproved,
                Some(id),
                Some(&invocation.tool_name),
                Value::Null,
            )
            .await;
            let _ = self
                .tool_invocation_tx
                .send(RuntimeEvent::ExecuteToolInvocation { invocation })
                .await;
        } else {
            self.notify(
                StreamEventKind::ToolDenied,
                Some(id),
                Some(&invocation.tool_name),
                serde_json::json!({ "reason": reason }),
            )
            .await;
            let _ = self
                .tool_result_tx
                .send(RuntimeEvent::ToolResult {
                    invocation_id: invocation_id.to_string(),
                    is_denied: true,
                    error: reason,
                    output: None,
                })
                .await;
        }
    }

    /// `ExecuteToolInvocation` handler (spec §4.6). Spawns the tool call as
    /// a background task and returns immediately so the worker stays free
    /// to dispatch the next invocation (scenario C: two tools in flight,
    /// whichever finishes first settles first).
    pub async fn handle_execute_tool_invocation(&mut self, invocation: Arc<ToolInvocation>) {
        self.notify(
            StreamEventKind::ToolExecutionStarted,
            Some(invocation.id),
            Some(&invocation.tool_name),
            Value::Null,
        )
        .await;

        let tool = self.registry.get(&invocation.tool_name);
        let result_tx = self.tool_result_tx.clone();
        let mut arguments = invocation.arguments.clone();
        let invocation_id = invocation.id.to_string();

        tokio::spawn(async move {
            let outcome = run_tool(tool, &mut arguments).await;
            let event = match outcome {
                Ok(output) => RuntimeEvent::ToolResult {
                    invocation_id,
                    is_denied: false,
                    error: None,
                    output: Some(output),
                },
                Err(err) => RuntimeEvent::ToolResult {
                    invocation_id,
                    is_denied: false,
                    error: Some(err.to_string()),
                    output: None,
                },
            };
            let _ = result_tx.send(event).await;
        });
    }

    /// `ToolResult` handler (spec §4.6). Emits the terminal lifecycle event
    /// (not for denied results), then folds the result into the open
    /// turn's aggregation, enqueuing the synthetic `sender=TOOL` message
    /// once every invocation of the turn has settled.
    pub async fn handle_tool_result(
        &mut self,
        invocation_id: String,
        is_denied: bool,
        error: Option<String>,
        output: Option<Value>,
        tool_name_hint: Option<String>,
    ) {
        let id: u64 = match invocation_id.parse() {
            Ok(id) => id,
            Err(_) => {
                log::warn!("tool result for non-numeric invocation id {}", invocation_id);
                return;
            }
        };

        if !is_denied {
            let kind = if error.is_some() {
                StreamEventKind::ToolExecutionFailed
            } else {
                StreamEventKind::ToolExecutionSucceeded
            };
            self.notify(
                kind,
                Some(id),
                tool_name_hint.as_deref(),
                serde_json::json!({ "error": error, "output": output }),
            )
            .await;
        }

        let aggregated = AggregatedToolResult {
            invocation_id: invocation_id.clone(),
            tool_name: tool_name_hint.unwrap_or_default(),
            is_denied,
            error,
            output,
        };

        if let Some(results) = self.aggregator.record(id, aggregated) {
            let content = aggregate_to_text(&results);
            let _ = self
                .user_message_tx
                .send(RuntimeEvent::LLMUserMessageReady { content })
                .await;
        }
    }
}

async fn run_tool(tool: Option<Arc<dyn Tool>>, arguments: &mut Value) -> Result<Value, ToolError> {
    let tool = tool.ok_or_else(|| ToolError::NotFound("<unregistered>".to_string()))?;
    tool.preprocess(arguments)
        .await
        .map_err(|e| ToolError::Preprocessor(e.to_string()))?;
    let ctx = CallContext::default();
    let mut result = tool
        .execute(&ctx, arguments)
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    // postprocess errors do not fail the invocation; they are logged the
    // same way a hook failure is (spec §4.3 analogue for result processors).
    if let Err(err) = tool.postprocess(&mut result).await {
        log::warn!("tool postprocess failed: {}", err);
    }
    Ok(result)
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, name: &str) -> AggregatedToolResult {
        AggregatedToolResult {
            invocation_id: id.to_string(),
            tool_name: name.to_string(),
            is_denied: false,
            error: None,
            output: Some(serde_json::json!({"ok": true})),
        }
    }

    #[test]
    fn scenario_c_out_of_order_completion_reorders_to_emission_sequence() {
        let mut aggregator = ToolResultAggregator::new();
        aggregator.begin_turn(vec![1, 2]);

        assert!(aggregator.record(2, result("2", "B")).is_none());
        let done = aggregator.record(1, result("1", "A")).expect("turn complete");

        assert_eq!(done[0].invocation_id, "1");
        assert_eq!(done[1].invocation_id, "2");
    }

    #[test]
    fn duplicate_result_for_settled_id_is_dropped() {
        let mut aggregator = ToolResultAggregator::new();
        aggregator.begin_turn(vec![1]);
        assert!(aggregator.record(1, result("1", "A")).is_some());

        aggregator.begin_turn(vec![2]);
        assert!(aggregator.record(1, result("1", "A")).is_none());
    }

    #[test]
    fn single_invocation_turn_completes_immediately() {
        let mut aggregator = ToolResultAggregator::new();
        aggregator.begin_turn(vec![7]);
        let done = aggregator.record(7, result("7", "write_file")).unwrap();
        assert_eq!(done.len(), 1);
    }
}
