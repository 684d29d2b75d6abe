//! Parser strategy selection and the tool syntax registry (spec.md §4.5).

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::segment::SegmentType;

/// Which text-embedded tool syntax (if any) the parser recognizes for a
/// stream. Chosen once per stream from configuration; the spec leaves no
/// fixed default (§9, Open Question 2) — this crate's [`EngineConfig`](crate::engine::config::EngineConfig)
/// defaults to [`ParserStrategy::ApiToolCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserStrategy {
    /// `<write_file path="...">...</write_file>`-style XML tags.
    Xml,
    /// A JSON-prefixed tool call embedded in plain text, e.g.
    /// `{"tool_call": {"name": "...", "arguments": {...}}}`.
    Json,
    /// `[[SEG_START {"type":"write_file","path":"/a.py"}]]` / `[[SEG_END]]`
    /// marker lines (spec §6, "Sentinel stream format").
    Sentinel,
    /// Tool calls arrive out-of-band as `ChunkResponse.tool_calls`; the text
    /// path is pass-through.
    ApiToolCall,
}

/// Resolves `(segment_type, segment metadata)` to `(tool_name, arguments)`.
///
/// Segment-to-tool resolution is pluggable (spec §4.5 "Registry semantics").
/// Unknown XML tags are never discarded — the scanner falls back to `Text`
/// before a tag is ever handed to the registry, so `resolve` only needs to
/// handle the fixed built-in segment types plus any names an embedder wants
/// to alias.
pub struct ToolSyntaxRegistry {
    aliases: HashMap<String, String>,
}

impl Default for ToolSyntaxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSyntaxRegistry {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Register a case-insensitive alias from a raw tag/segment name to a
    /// canonical tool name (spec §4.5: "Tool names are looked up
    /// case-insensitively").
    pub fn alias(&mut self, raw_name: &str, tool_name: &str) {
        self.aliases
            .insert(raw_name.to_lowercase(), tool_name.to_string());
    }

    /// Resolve a segment into `(tool_name, arguments)`.
    pub fn resolve(
        &self,
        segment_type: SegmentType,
        metadata: &Value,
        content: &str,
    ) -> (String, Value) {
        if segment_type == SegmentType::ToolCall {
            return self.resolve_tool_call(metadata, content);
        }

        let canonical = segment_type.as_str();
        let tool_name = self.canonicalize(canonical);

        let arguments = match segment_type {
            SegmentType::WriteFile => write_like_arguments(metadata, content),
            SegmentType::PatchFile => write_like_arguments(metadata, content),
            SegmentType::RunBash => {
                let mut map = Map::new();
                map.insert("command".to_string(), Value::String(content.to_string()));
                Value::Object(map)
            }
            SegmentType::ToolCall => unreachable!(),
            SegmentType::Text | SegmentType::Reasoning => Value::Null,
        };

        (tool_name, arguments)
    }

    fn canonicalize(&self, raw_name: &str) -> String {
        self.aliases
            .get(raw_name)
            .cloned()
            .unwrap_or_else(|| raw_name.to_string())
    }

    /// A `tool_call` segment carries its real tool name and arguments either
    /// already-parsed in `metadata` (`api_tool_call` mode parks them there
    /// per spec §4.5 so the adapter never re-parses streamed content; the
    /// JSON text strategy's embedded-document metadata is normalized to the
    /// same `{name, arguments}` shape in the parser) or, for the XML
    /// `<tool_call name="...">...</tool_call>` form, as raw tag attributes in
    /// `metadata` plus a JSON arguments document in `content`.
    fn resolve_tool_call(&self, metadata: &Value, content: &str) -> (String, Value) {
        let raw_name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("tool_call");
        let tool_name = self.canonicalize(&raw_name.to_lowercase());

        let arguments = match metadata.get("arguments") {
            Some(args) => args.clone(),
            None => serde_json::from_str(content).unwrap_or(Value::Null),
        };

        (tool_name, arguments)
    }
}

fn write_like_arguments(metadata: &Value, content: &str) -> Value {
    let mut map = metadata.as_object().cloned().unwrap_or_default();
    map.insert("content".to_string(), Value::String(content.to_string()));
    Value::Object(map)
}
