//! Invocation adapter — consumes [`SegmentEvent`]s into [`ToolInvocation`]s
//! (spec.md §3, §4.5).

use serde_json::Value;

use super::segment::{SegmentEvent, SegmentId, SegmentType};
use super::strategy::ToolSyntaxRegistry;

/// Result of the invocation adapter consuming segment events for one tool
/// segment (spec §3).
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Equal to the originating segment's `segment_id` (spec §3, §8
    /// round-trip property: `invocation.id == originating segment.id`).
    pub id: SegmentId,
    pub tool_name: String,
    pub arguments: Value,
}

struct OpenInvocation {
    segment_type: SegmentType,
    metadata: Value,
    content: String,
}

/// Stateful consumer that turns a [`SegmentEvent`] stream into
/// [`ToolInvocation`]s, one per closed tool-shaped segment
/// (`tool_call`/`write_file`/`patch_file`/`run_bash`).
///
/// Text and reasoning segments never produce an invocation and are ignored
/// here; the worker's text handling lives in the dispatcher/notifier path
/// instead.
pub struct InvocationAdapter {
    registry: ToolSyntaxRegistry,
    open: std::collections::HashMap<SegmentId, OpenInvocation>,
}

impl InvocationAdapter {
    pub fn new(registry: ToolSyntaxRegistry) -> Self {
        Self {
            registry,
            open: std::collections::HashMap::new(),
        }
    }

    /// Feed one segment event; returns `Some(invocation)` only when the
    /// event closes a tool-shaped segment.
    pub fn ingest(&mut self, event: &SegmentEvent) -> Option<ToolInvocation> {
        match event {
            SegmentEvent::Start {
                segment_id,
                segment_type,
                metadata,
            } => {
                if is_tool_shaped(*segment_type) {
                    self.open.insert(
                        *segment_id,
                        OpenInvocation {
                            segment_type: *segment_type,
                            metadata: metadata.clone(),
                            content: String::new(),
                        },
                    );
                }
                None
            }
            SegmentEvent::Content { segment_id, delta } => {
                if let Some(open) = self.open.get_mut(segment_id) {
                    open.content.push_str(delta);
                }
                None
            }
            SegmentEvent::End {
                segment_id,
                metadata: end_metadata,
            } => {
                let open = self.open.remove(segment_id)?;
                let merged_metadata = merge_end_metadata(open.metadata, end_metadata.as_ref());
                // api_tool_call mode parks parsed arguments on END metadata
                // (spec §4.5) instead of re-parsing accumulated content; the
                // registry's `resolve` already knows how to read each
                // segment type's metadata/content shape.
                let (tool_name, arguments) =
                    self.registry
                        .resolve(open.segment_type, &merged_metadata, &open.content);
                Some(ToolInvocation {
                    id: *segment_id,
                    tool_name,
                    arguments,
                })
            }
        }
    }
}

fn is_tool_shaped(segment_type: SegmentType) -> bool {
    matches!(
        segment_type,
        SegmentType::ToolCall | SegmentType::WriteFile | SegmentType::PatchFile | SegmentType::RunBash
    )
}

fn merge_end_metadata(start_metadata: Value, end_metadata: Option<&Value>) -> Value {
    match (start_metadata, end_metadata) {
        (Value::Object(mut start_map), Some(Value::Object(end_map))) => {
            for (k, v) in end_map {
                start_map.insert(k.clone(), v.clone());
            }
            Value::Object(start_map)
        }
        (start, None) => start,
        (Value::Null, Some(end)) => end.clone(),
        (start, Some(_)) => start,
    }
}
