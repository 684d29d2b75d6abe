//! Provider-agnostic streaming input (spec.md §6, LLM provider contract).
//!
//! The parser never talks to a concrete LLM SDK — it only consumes
//! [`ChunkResponse`] values, which is the narrow contract the core expects
//! from whatever streams chunks in (out of scope here; see spec.md §1/§6).

use serde_json::Value;

/// Token accounting reported by a provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// One incremental delta of a provider-native tool call (spec §6).
///
/// Only the first delta for a given `index` is required to carry `name`/
/// `call_id`; `arguments_delta` fragments accumulate by concatenation in
/// arrival order.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// One chunk of a streamed LLM response (spec §6, §4.5).
#[derive(Debug, Clone, Default)]
pub struct ChunkResponse {
    /// Plain/text-embedded-tool-syntax content for this chunk.
    pub content: String,
    /// Reasoning/thinking content, kept separate from `content`.
    pub reasoning: Option<String>,
    /// `true` on the final chunk of the stream.
    pub is_complete: bool,
    pub usage: Option<TokenUsage>,
    /// Provider-native tool-call deltas, only populated in `api_tool_call`
    /// parser mode.
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Parsed JSON arguments object assembled from concatenated
/// `arguments_delta` fragments for one `ToolCallDelta` index.
pub fn try_parse_arguments(accumulated: &str) -> Option<Value> {
    if accumulated.trim().is_empty() {
        return None;
    }
    serde_json::from_str(accumulated).ok()
}
