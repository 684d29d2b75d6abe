//! Segment events, the parser's output unit (spec.md §3, §4.5).

use serde_json::Value;

/// A classified slice of LLM output that the streaming parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Text,
    ToolCall,
    WriteFile,
    PatchFile,
    RunBash,
    Reasoning,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Text => "text",
            SegmentType::ToolCall => "tool_call",
            SegmentType::WriteFile => "write_file",
            SegmentType::PatchFile => "patch_file",
            SegmentType::RunBash => "run_bash",
            SegmentType::Reasoning => "reasoning",
        }
    }
}

/// Stable identifier shared by a segment's START, zero-or-more CONTENTs, and
/// exactly one END. Also reused as the correlated `ToolInvocation::id`
/// (spec §3: "invocation_id = segment_id").
pub type SegmentId = u64;

/// The parser's output unit (spec §3).
///
/// Invariant upheld by [`StreamingToolCallParser`](super::StreamingToolCallParser):
/// for each `segment_id`, exactly one `Start` precedes zero or more
/// `Content`s and exactly one `End`.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    Start {
        segment_id: SegmentId,
        segment_type: SegmentType,
        metadata: Value,
    },
    Content {
        segment_id: SegmentId,
        delta: String,
    },
    End {
        segment_id: SegmentId,
        /// `truncated: true` when finalization closed the segment without
        /// observing its natural closing token (spec §4.5 "Finalization").
        metadata: Option<Value>,
    },
}

impl SegmentEvent {
    pub fn segment_id(&self) -> SegmentId {
        match self {
            SegmentEvent::Start { segment_id, .. } => *segment_id,
            SegmentEvent::Content { segment_id, .. } => *segment_id,
            SegmentEvent::End { segment_id, .. } => *segment_id,
        }
    }
}
