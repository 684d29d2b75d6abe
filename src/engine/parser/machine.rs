//! The streaming tool-call parser state machine (spec.md §4.5).
//!
//! `StreamScanner` is a growing character buffer with a cursor; `State`
//! values consume from the cursor and may peek ahead. The machine is driven
//! by repeated calls to [`StreamingToolCallParser::feed`] (one per
//! `ChunkResponse`) and a final [`StreamingToolCallParser::finalize`] when
//! the upstream stream ends. It never emits a partial closing token: content
//! states hold back the last `len(closing_token) - 1` characters until the
//! token either completes (flush + emit END) or is ruled out (flush the held
//! bytes as ordinary content and keep scanning).

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::chunk::{try_parse_arguments, ChunkResponse, ToolCallDelta};
use super::segment::{SegmentEvent, SegmentId, SegmentType};
use super::strategy::ParserStrategy;

/// A growing character buffer with a cursor. States consume from the
/// cursor and may peek ahead without committing.
#[derive(Default)]
struct StreamScanner {
    buf: String,
    cursor: usize,
}

impl StreamScanner {
    fn push(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    fn remaining(&self) -> &str {
        &self.buf[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    /// Drop already-consumed bytes once in a while so the buffer doesn't
    /// grow unbounded across a long stream.
    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buf.drain(0..self.cursor);
            self.cursor = 0;
        }
    }
}

/// Holds back the last `token.len() - 1` bytes of a content stream so a
/// closing token can never be partially observed by the consumer.
struct Holdback {
    token: Vec<u8>,
    held: String,
}

impl Holdback {
    fn new(token: &str) -> Self {
        Self {
            token: token.as_bytes().to_vec(),
            held: String::new(),
        }
    }

    /// Feed new raw text through the holdback. Returns `(safe_to_emit,
    /// closed)`: `safe_to_emit` is content the caller may emit as
    /// `SEGMENT_CONTENT` right now; `closed` is `Some(trailing content
    /// before the token)` once the closing token has been observed in full
    /// (already excluded from `safe_to_emit`/the returned trailing slice).
    fn feed(&mut self, text: &str) -> (String, Option<()>) {
        self.held.push_str(text);
        if let Some(pos) = find_bytes(self.held.as_bytes(), &self.token) {
            let before = self.held[..pos].to_string();
            self.held.clear();
            return (before, Some(()));
        }
        let keep = self.token.len().saturating_sub(1);
        if self.held.len() > keep {
            let split_at = self.held.len() - keep;
            // Only split on a char boundary.
            let mut split_at = split_at;
            while split_at > 0 && !self.held.is_char_boundary(split_at) {
                split_at -= 1;
            }
            let safe = self.held[..split_at].to_string();
            self.held.drain(..split_at);
            (safe, None)
        } else {
            (String::new(), None)
        }
    }

    /// Flush whatever is held, unterminated (used on finalize/truncation).
    fn flush(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

enum ActiveState {
    Text,
    /// Buffering an opening `<tag ...>` until `>` is observed.
    XmlTagInit { buf: String },
    XmlContent {
        segment_id: SegmentId,
        segment_type: SegmentType,
        metadata: Value,
        closing_token: String,
        holdback: Holdback,
    },
    /// Buffering a possible `{"tool_call": ...}` prefix (JSON strategy).
    JsonInit { buf: String },
    JsonContent {
        segment_id: SegmentId,
        depth: i32,
        buf: String,
    },
    /// Buffering a possible `[[SEG_START ...]]` marker line (sentinel strategy).
    SentinelInit { buf: String },
    SentinelContent {
        segment_id: SegmentId,
        segment_type: SegmentType,
        metadata: Value,
        holdback: Holdback,
    },
}

const JSON_TOOL_CALL_PREFIX: &str = "{\"tool_call\"";
const SENTINEL_START_PREFIX: &str = "[[SEG_START";
const SENTINEL_END_MARKER: &str = "[[SEG_END]]";

struct ApiToolCallAccumulator {
    segment_id: SegmentId,
    call_id: Option<String>,
    name: Option<String>,
    arguments_text: String,
}

/// Incrementally converts a lazy sequence of [`ChunkResponse`]s into a lazy
/// sequence of [`SegmentEvent`]s (spec §4.5).
pub struct StreamingToolCallParser {
    strategy: ParserStrategy,
    scanner: StreamScanner,
    state: ActiveState,
    next_segment_id: SegmentId,
    text_segment_open: bool,
    text_segment_id: SegmentId,
    api_tool_calls: HashMap<usize, ApiToolCallAccumulator>,
    api_last_index: Option<usize>,
}

impl StreamingToolCallParser {
    pub fn new(strategy: ParserStrategy) -> Self {
        Self {
            strategy,
            scanner: StreamScanner::default(),
            state: ActiveState::Text,
            next_segment_id: 0,
            text_segment_open: false,
            text_segment_id: 0,
            api_tool_calls: HashMap::new(),
            api_last_index: None,
        }
    }

    fn alloc_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Feed one upstream chunk; returns the segment events it produced.
    pub fn feed(&mut self, chunk: &ChunkResponse) -> Vec<SegmentEvent> {
        let mut out = Vec::new();

        if let Some(reasoning) = &chunk.reasoning {
            if !reasoning.is_empty() {
                let id = self.alloc_id();
                out.push(SegmentEvent::Start {
                    segment_id: id,
                    segment_type: SegmentType::Reasoning,
                    metadata: Value::Null,
                });
                out.push(SegmentEvent::Content {
                    segment_id: id,
                    delta: reasoning.clone(),
                });
                out.push(SegmentEvent::End {
                    segment_id: id,
                    metadata: None,
                });
            }
        }

        if self.strategy == ParserStrategy::ApiToolCall {
            self.feed_api_tool_call_text(&chunk.content, &mut out);
            if let Some(deltas) = &chunk.tool_calls {
                self.feed_tool_call_deltas(deltas, &mut out);
            }
        } else {
            self.scanner.push(&chunk.content);
            self.drain(&mut out);
        }

        if chunk.is_complete {
            self.finalize_into(&mut out, true);
        }

        out
    }

    /// Flush any outstanding state when the upstream stream ends without a
    /// final `is_complete` chunk arriving (e.g. mid-content truncation).
    pub fn finalize(&mut self) -> Vec<SegmentEvent> {
        let mut out = Vec::new();
        self.finalize_into(&mut out, false);
        out
    }

    /// `clean` is `true` when this finalization was reached because a chunk
    /// carried `is_complete`, `false` when the caller is flushing leftover
    /// state after the upstream stream simply stopped. A still-open XML/JSON/
    /// sentinel segment is real truncation either way (the state machine
    /// already closes those during `drain` once their closing token is seen,
    /// so reaching `finalize_into` with one still open means it never was).
    /// The `api_tool_call` accumulator is different: its last index is never
    /// closed by `feed_tool_call_deltas` (only a following different index
    /// closes the previous one), so a clean `is_complete` with the final
    /// tool call's arguments fully buffered must not be mislabeled truncated.
    fn finalize_into(&mut self, out: &mut Vec<SegmentEvent>, clean: bool) {
        if self.text_segment_open {
            out.push(SegmentEvent::End {
                segment_id: self.text_segment_id,
                metadata: None,
            });
            self.text_segment_open = false;
        }

        let state = std::mem::replace(&mut self.state, ActiveState::Text);
        match state {
            ActiveState::XmlContent {
                segment_id,
                holdback,
                mut metadata,
                ..
            } => {
                let mut holdback = holdback;
                let trailing = holdback.flush();
                if !trailing.is_empty() {
                    out.push(SegmentEvent::Content {
                        segment_id,
                        delta: trailing,
                    });
                }
                mark_truncated(&mut metadata);
                out.push(SegmentEvent::End {
                    segment_id,
                    metadata: Some(metadata),
                });
            }
            ActiveState::SentinelContent {
                segment_id,
                holdback,
                mut metadata,
                ..
            } => {
                let mut holdback = holdback;
                let trailing = holdback.flush();
                if !trailing.is_empty() {
                    out.push(SegmentEvent::Content {
                        segment_id,
                        delta: trailing,
                    });
                }
                mark_truncated(&mut metadata);
                out.push(SegmentEvent::End {
                    segment_id,
                    metadata: Some(metadata),
                });
            }
            ActiveState::JsonContent {
                segment_id, buf, ..
            } => {
                out.push(SegmentEvent::End {
                    segment_id,
                    metadata: Some(json_tool_call_metadata(&buf, true)),
                });
            }
            // Unterminated tag/prefix buffers with no committed segment are
            // simply dropped as raw text — no START was ever emitted.
            ActiveState::XmlTagInit { buf }
            | ActiveState::JsonInit { buf }
            | ActiveState::SentinelInit { buf } => {
                if !buf.is_empty() {
                    self.emit_text(out, &buf);
                    if self.text_segment_open {
                        out.push(SegmentEvent::End {
                            segment_id: self.text_segment_id,
                            metadata: None,
                        });
                        self.text_segment_open = false;
                    }
                }
            }
            ActiveState::Text => {}
        }

        for (_, acc) in self.api_tool_calls.drain() {
            let arguments = try_parse_arguments(&acc.arguments_text).unwrap_or(Value::Null);
            let mut metadata = Map::new();
            metadata.insert("arguments".to_string(), arguments);
            if let Some(name) = acc.name {
                metadata.insert("name".to_string(), Value::String(name));
            }
            if let Some(call_id) = acc.call_id {
                metadata.insert("call_id".to_string(), Value::String(call_id));
            }
            if !clean {
                metadata.insert("truncated".to_string(), Value::Bool(true));
            }
            out.push(SegmentEvent::End {
                segment_id: acc.segment_id,
                metadata: Some(Value::Object(metadata)),
            });
        }
        self.api_last_index = None;
    }

    fn emit_text(&mut self, out: &mut Vec<SegmentEvent>, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.text_segment_open {
            self.text_segment_id = self.alloc_id();
            self.text_segment_open = true;
            out.push(SegmentEvent::Start {
                segment_id: self.text_segment_id,
                segment_type: SegmentType::Text,
                metadata: Value::Null,
            });
        }
        out.push(SegmentEvent::Content {
            segment_id: self.text_segment_id,
            delta: text.to_string(),
        });
    }

    fn close_text(&mut self, out: &mut Vec<SegmentEvent>) {
        if self.text_segment_open {
            out.push(SegmentEvent::End {
                segment_id: self.text_segment_id,
                metadata: None,
            });
            self.text_segment_open = false;
        }
    }

    /// Drive the non-`api_tool_call` state machine forward as far as the
    /// currently buffered input allows.
    fn drain(&mut self, out: &mut Vec<SegmentEvent>) {
        loop {
            let made_progress = match &self.state {
                ActiveState::Text => self.drain_text(out),
                ActiveState::XmlTagInit { .. } => self.drain_xml_tag_init(out),
                ActiveState::XmlContent { .. } => self.drain_xml_content(out),
                ActiveState::JsonInit { .. } => self.drain_json_init(out),
                ActiveState::JsonContent { .. } => self.drain_json_content(out),
                ActiveState::SentinelInit { .. } => self.drain_sentinel_init(out),
                ActiveState::SentinelContent { .. } => self.drain_sentinel_content(out),
            };
            self.scanner.compact();
            if !made_progress {
                break;
            }
        }
    }

    fn open_marker(&self) -> Option<&'static str> {
        match self.strategy {
            ParserStrategy::Xml => Some("<"),
            ParserStrategy::Json => Some("{"),
            ParserStrategy::Sentinel => Some("["),
            ParserStrategy::ApiToolCall => None,
        }
    }

    fn drain_text(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let marker = match self.open_marker() {
            Some(m) => m,
            None => return false,
        };
        let remaining = self.scanner.remaining();
        if remaining.is_empty() {
            return false;
        }
        match remaining.find(marker) {
            Some(pos) => {
                if pos > 0 {
                    let text = remaining[..pos].to_string();
                    self.emit_text(out, &text);
                }
                self.scanner.advance(pos);
                self.state = match self.strategy {
                    ParserStrategy::Xml => ActiveState::XmlTagInit { buf: String::new() },
                    ParserStrategy::Json => ActiveState::JsonInit { buf: String::new() },
                    ParserStrategy::Sentinel => ActiveState::SentinelInit { buf: String::new() },
                    ParserStrategy::ApiToolCall => unreachable!(),
                };
                true
            }
            None => {
                // No marker yet; flush all but the last byte (in case the
                // marker is split across chunk boundaries) as text.
                let keep = 1usize;
                if remaining.len() > keep {
                    let mut split_at = remaining.len() - keep;
                    while split_at > 0 && !remaining.is_char_boundary(split_at) {
                        split_at -= 1;
                    }
                    let text = remaining[..split_at].to_string();
                    self.scanner.advance(split_at);
                    self.emit_text(out, &text);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn drain_xml_tag_init(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining().to_string();
        if let Some(end) = remaining.find('>') {
            let tag_text = remaining[..=end].to_string();
            self.scanner.advance(end + 1);
            let (segment_type, metadata) = parse_xml_open_tag(&tag_text);
            match segment_type {
                Some(st) => {
                    self.close_text(out);
                    let segment_id = self.alloc_id();
                    out.push(SegmentEvent::Start {
                        segment_id,
                        segment_type: st,
                        metadata: metadata.clone(),
                    });
                    let closing_token = format!("</{}>", tag_name_for(st));
                    self.state = ActiveState::XmlContent {
                        segment_id,
                        segment_type: st,
                        metadata,
                        closing_token: closing_token.clone(),
                        holdback: Holdback::new(&closing_token),
                    };
                }
                None => {
                    // Unknown tag: never discarded, emitted as text verbatim.
                    self.emit_text(out, &tag_text);
                    self.state = ActiveState::Text;
                }
            }
            true
        } else {
            false
        }
    }

    fn drain_xml_content(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining().to_string();
        if remaining.is_empty() {
            return false;
        }
        self.scanner.advance(remaining.len());
        if let ActiveState::XmlContent {
            segment_id,
            holdback,
            metadata,
            ..
        } = &mut self.state
        {
            let (safe, closed) = holdback.feed(&remaining);
            if !safe.is_empty() {
                out.push(SegmentEvent::Content {
                    segment_id: *segment_id,
                    delta: strip_content_sentinels(&safe),
                });
            }
            if closed.is_some() {
                let sid = *segment_id;
                let end_metadata = metadata.clone();
                out.push(SegmentEvent::End {
                    segment_id: sid,
                    metadata: Some(end_metadata),
                });
                self.state = ActiveState::Text;
            }
        }
        true
    }

    fn drain_json_init(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining();
        if remaining.is_empty() {
            return false;
        }
        if let ActiveState::JsonInit { buf } = &mut self.state {
            buf.push_str(remaining);
            let candidate = buf.clone();
            self.scanner.advance(remaining.len());

            if candidate.len() >= JSON_TOOL_CALL_PREFIX.len() {
                if candidate.starts_with(JSON_TOOL_CALL_PREFIX) {
                    self.close_text(out);
                    let segment_id = self.alloc_id();
                    out.push(SegmentEvent::Start {
                        segment_id,
                        segment_type: SegmentType::ToolCall,
                        metadata: Value::Null,
                    });
                    let depth = count_brace_depth(&candidate);
                    out.push(SegmentEvent::Content {
                        segment_id,
                        delta: candidate.clone(),
                    });
                    self.state = if depth <= 0 {
                        out.push(SegmentEvent::End {
                            segment_id,
                            metadata: Some(json_tool_call_metadata(&candidate, false)),
                        });
                        ActiveState::Text
                    } else {
                        ActiveState::JsonContent {
                            segment_id,
                            depth,
                            buf: candidate,
                        }
                    };
                } else {
                    // Not a tool call prefix; replay the buffered bytes as text.
                    self.emit_text(out, &candidate);
                    self.state = ActiveState::Text;
                }
            }
            true
        } else {
            false
        }
    }

    fn drain_json_content(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining().to_string();
        if remaining.is_empty() {
            return false;
        }
        self.scanner.advance(remaining.len());
        if let ActiveState::JsonContent {
            segment_id,
            depth,
            buf,
        } = &mut self.state
        {
            for ch in remaining.chars() {
                match ch {
                    '{' => *depth += 1,
                    '}' => *depth -= 1,
                    _ => {}
                }
            }
            buf.push_str(&remaining);
            out.push(SegmentEvent::Content {
                segment_id: *segment_id,
                delta: remaining,
            });
            if *depth <= 0 {
                let sid = *segment_id;
                let metadata = json_tool_call_metadata(buf, false);
                out.push(SegmentEvent::End {
                    segment_id: sid,
                    metadata: Some(metadata),
                });
                self.state = ActiveState::Text;
            }
        }
        true
    }

    fn drain_sentinel_init(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining();
        if remaining.is_empty() {
            return false;
        }
        if let ActiveState::SentinelInit { buf } = &mut self.state {
            buf.push_str(remaining);
            let candidate = buf.clone();
            self.scanner.advance(remaining.len());

            if candidate.len() < SENTINEL_START_PREFIX.len() {
                // Not enough data yet to decide; keep buffering.
                return true;
            }
            if !candidate.starts_with(SENTINEL_START_PREFIX) {
                self.emit_text(out, &candidate);
                self.state = ActiveState::Text;
                return true;
            }
            if let Some(end) = candidate.find("]]") {
                let marker_line = candidate[..end + 2].to_string();
                let rest = candidate[end + 2..].to_string();
                let json_part = marker_line
                    .trim_start_matches(SENTINEL_START_PREFIX)
                    .trim_end_matches("]]")
                    .trim();
                let metadata: Value =
                    serde_json::from_str(json_part).unwrap_or_else(|_| Value::Null);
                let segment_type = metadata
                    .get("type")
                    .and_then(|v| v.as_str())
                    .and_then(segment_type_from_name)
                    .unwrap_or(SegmentType::Text);

                self.close_text(out);
                let segment_id = self.alloc_id();
                out.push(SegmentEvent::Start {
                    segment_id,
                    segment_type,
                    metadata: metadata.clone(),
                });
                self.state = ActiveState::SentinelContent {
                    segment_id,
                    segment_type,
                    metadata,
                    holdback: Holdback::new(SENTINEL_END_MARKER),
                };
                if !rest.is_empty() {
                    self.scanner.buf = rest + self.scanner.remaining();
                    self.scanner.cursor = 0;
                }
            }
            true
        } else {
            false
        }
    }

    fn drain_sentinel_content(&mut self, out: &mut Vec<SegmentEvent>) -> bool {
        let remaining = self.scanner.remaining().to_string();
        if remaining.is_empty() {
            return false;
        }
        self.scanner.advance(remaining.len());
        if let ActiveState::SentinelContent {
            segment_id,
            holdback,
            metadata,
            ..
        } = &mut self.state
        {
            let (safe, closed) = holdback.feed(&remaining);
            if !safe.is_empty() {
                out.push(SegmentEvent::Content {
                    segment_id: *segment_id,
                    delta: strip_content_sentinels(&safe),
                });
            }
            if closed.is_some() {
                let sid = *segment_id;
                let end_metadata = metadata.clone();
                out.push(SegmentEvent::End {
                    segment_id: sid,
                    metadata: Some(end_metadata),
                });
                self.state = ActiveState::Text;
            }
        }
        true
    }

    fn feed_api_tool_call_text(&mut self, text: &str, out: &mut Vec<SegmentEvent>) {
        if text.is_empty() {
            return;
        }
        self.emit_text(out, text);
    }

    fn feed_tool_call_deltas(&mut self, deltas: &[ToolCallDelta], out: &mut Vec<SegmentEvent>) {
        for delta in deltas {
            if self.api_last_index != Some(delta.index) {
                if let Some(prev_index) = self.api_last_index {
                    if prev_index != delta.index {
                        self.close_api_tool_call(prev_index, out);
                    }
                }
            }
            self.api_last_index = Some(delta.index);

            let is_new = !self.api_tool_calls.contains_key(&delta.index);
            if is_new {
                self.close_text(out);
                let segment_id = self.alloc_id();
                let mut metadata = Map::new();
                if let Some(name) = &delta.name {
                    metadata.insert("name".to_string(), Value::String(name.clone()));
                }
                if let Some(call_id) = &delta.call_id {
                    metadata.insert("call_id".to_string(), Value::String(call_id.clone()));
                }
                out.push(SegmentEvent::Start {
                    segment_id,
                    segment_type: SegmentType::ToolCall,
                    metadata: Value::Object(metadata),
                });
                self.api_tool_calls.insert(
                    delta.index,
                    ApiToolCallAccumulator {
                        segment_id,
                        call_id: delta.call_id.clone(),
                        name: delta.name.clone(),
                        arguments_text: String::new(),
                    },
                );
            }

            if let Some(acc) = self.api_tool_calls.get_mut(&delta.index) {
                if acc.name.is_none() {
                    acc.name = delta.name.clone();
                }
                if acc.call_id.is_none() {
                    acc.call_id = delta.call_id.clone();
                }
                if let Some(args_delta) = &delta.arguments_delta {
                    acc.arguments_text.push_str(args_delta);
                    out.push(SegmentEvent::Content {
                        segment_id: acc.segment_id,
                        delta: args_delta.clone(),
                    });
                }
            }
        }
    }

    fn close_api_tool_call(&mut self, index: usize, out: &mut Vec<SegmentEvent>) {
        if let Some(acc) = self.api_tool_calls.remove(&index) {
            let arguments = try_parse_arguments(&acc.arguments_text).unwrap_or(Value::Null);
            let mut metadata = Map::new();
            metadata.insert("arguments".to_string(), arguments);
            if let Some(name) = acc.name {
                metadata.insert("name".to_string(), Value::String(name));
            }
            if let Some(call_id) = acc.call_id {
                metadata.insert("call_id".to_string(), Value::String(call_id));
            }
            out.push(SegmentEvent::End {
                segment_id: acc.segment_id,
                metadata: Some(Value::Object(metadata)),
            });
        }
    }
}

/// Unwraps a `{"tool_call": {"name": "...", "arguments": {...}}}` document
/// (or a bare `{"name": ..., "arguments": ...}` one) into the normalized
/// `{name, arguments}` shape [`ToolSyntaxRegistry::resolve`](super::strategy::ToolSyntaxRegistry::resolve)
/// expects on a `tool_call` segment's END metadata (spec §4.5: the
/// invocation adapter consumes pre-parsed arguments, never re-parsing
/// streamed content).
fn json_tool_call_metadata(raw: &str, truncated: bool) -> Value {
    let parsed = try_parse_arguments(raw).unwrap_or(Value::Null);
    let inner = parsed.get("tool_call").cloned().unwrap_or(parsed);
    let mut metadata = Map::new();
    if let Some(name) = inner.get("name").and_then(|v| v.as_str()) {
        metadata.insert("name".to_string(), Value::String(name.to_string()));
    }
    metadata.insert(
        "arguments".to_string(),
        inner.get("arguments").cloned().unwrap_or(Value::Null),
    );
    if truncated {
        metadata.insert("truncated".to_string(), Value::Bool(true));
    }
    Value::Object(metadata)
}

fn mark_truncated(metadata: &mut Value) {
    match metadata {
        Value::Object(map) => {
            map.insert("truncated".to_string(), Value::Bool(true));
        }
        other => {
            let mut map = Map::new();
            if !other.is_null() {
                map.insert("value".to_string(), other.clone());
            }
            map.insert("truncated".to_string(), Value::Bool(true));
            *other = Value::Object(map);
        }
    }
}

fn tag_name_for(segment_type: SegmentType) -> &'static str {
    match segment_type {
        SegmentType::WriteFile => "write_file",
        SegmentType::PatchFile => "patch_file",
        SegmentType::RunBash => "run_bash",
        SegmentType::ToolCall => "tool_call",
        SegmentType::Reasoning => "reasoning",
        SegmentType::Text => "text",
    }
}

fn segment_type_from_name(name: &str) -> Option<SegmentType> {
    match name {
        "write_file" => Some(SegmentType::WriteFile),
        "patch_file" => Some(SegmentType::PatchFile),
        "run_bash" => Some(SegmentType::RunBash),
        "tool_call" => Some(SegmentType::ToolCall),
        "reasoning" => Some(SegmentType::Reasoning),
        "text" => Some(SegmentType::Text),
        _ => None,
    }
}

/// Parse an opening XML-like tag (`<write_file path="/a.py">`) into a
/// segment type plus metadata. Returns `None` for tags this parser does not
/// recognize, so the caller can fall back to emitting it as plain text.
fn parse_xml_open_tag(tag_text: &str) -> (Option<SegmentType>, Value) {
    let inner = tag_text.trim_start_matches('<').trim_end_matches('>');
    let mut parts = inner.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_lowercase();
    let attrs_str = parts.next().unwrap_or("");

    let segment_type = segment_type_from_name(&name);
    if segment_type.is_none() {
        return (None, Value::Null);
    }

    let mut metadata = Map::new();
    for (key, value) in parse_attributes(attrs_str) {
        metadata.insert(key, Value::String(value));
    }
    (segment_type, Value::Object(metadata))
}

fn parse_attributes(attrs_str: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut chars = attrs_str.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while matches!(chars.peek(), Some(c) if *c != '=' && !c.is_whitespace()) {
            key.push(chars.next().unwrap());
        }
        if key.is_empty() {
            break;
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            continue;
        }
        chars.next();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let quote = chars.peek().copied();
        let mut value = String::new();
        if quote == Some('"') || quote == Some('\'') {
            let q = quote.unwrap();
            chars.next();
            while let Some(c) = chars.next() {
                if c == q {
                    break;
                }
                value.push(c);
            }
        } else {
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                value.push(chars.next().unwrap());
            }
        }
        result.push((key, value));
    }
    result
}

/// Trim optional `__START_CONTENT__`/`__END_CONTENT__` sentinels from a
/// content delta (spec §4.5, "Pure content piping"). Applied per-delta, so a
/// sentinel split across deltas is not caught here; holdback only guards the
/// segment's outer closing token. This mirrors the spec's framing of the
/// inner sentinels as a further trim, not a hard guarantee.
fn strip_content_sentinels(text: &str) -> String {
    text.replace("__START_CONTENT__", "")
        .replace("__END_CONTENT__", "")
}

fn count_brace_depth(text: &str) -> i32 {
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}
