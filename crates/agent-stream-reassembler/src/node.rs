//! Per-exchange buffering state.

use std::collections::BTreeMap;

use agent_stream_core::messages::ToolCallPart;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::ReassemblyError;

/// Prefix left by an argument snapshot taken before any argument arrived.
const EMPTY_SNAPSHOT: &str = "{}";

/// Tool call whose name and arguments are still streaming in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingToolCall {
    pub part_kind: &'static str,
    pub tool_name: String,
    pub tool_call_id: String,
    /// JSON text under construction.
    pub args: String,
}

impl PendingToolCall {
    /// Start buffering from the part that opened the call.
    #[must_use]
    pub fn from_part(part: &ToolCallPart) -> Self {
        Self {
            part_kind: "tool-call",
            tool_name: part.tool_name.clone(),
            tool_call_id: part.tool_call_id.clone(),
            args: part.args_as_json_str(),
        }
    }

    /// Accumulated arguments, minus a leading empty snapshot when more text
    /// follows it.
    #[must_use]
    pub fn normalized_args(&self) -> &str {
        match self.args.strip_prefix(EMPTY_SNAPSHOT) {
            Some(rest) if !rest.is_empty() => rest,
            _ => &self.args,
        }
    }

    /// Parse the normalized arguments.
    ///
    /// # Errors
    /// Returns error if the accumulated text is not JSON.
    pub fn parsed_args(&self, event_idx: usize) -> Result<Value, ReassemblyError> {
        serde_json::from_str(self.normalized_args())
            .map_err(|source| ReassemblyError::InvalidArgs { event_idx, source })
    }
}

/// One request/response exchange of an agent run.
///
/// Text and thinking parts are published as they arrive; only tool calls
/// are buffered here until the node ends. A stopped node never changes
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    idx: usize,
    events: BTreeMap<usize, String>,
    parts: BTreeMap<usize, PendingToolCall>,
    stopped: bool,
}

impl Node {
    /// Create an open node.
    #[must_use]
    pub const fn new(idx: usize) -> Self {
        Self {
            idx,
            events: BTreeMap::new(),
            parts: BTreeMap::new(),
            stopped: false,
        }
    }

    #[must_use]
    pub const fn idx(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Event kind that opened each part, by part index.
    #[must_use]
    pub const fn events(&self) -> &BTreeMap<usize, String> {
        &self.events
    }

    /// Buffered tool calls, by part index.
    #[must_use]
    pub const fn parts(&self) -> &BTreeMap<usize, PendingToolCall> {
        &self.parts
    }

    pub(crate) fn record_event(&mut self, event_idx: usize, event_kind: &str) {
        self.events.insert(event_idx, event_kind.to_string());
    }

    pub(crate) fn buffer_tool_call(&mut self, event_idx: usize, call: PendingToolCall) {
        self.parts.insert(event_idx, call);
    }

    /// Append name and argument fragments to the buffered call at
    /// `event_idx`, which must carry the same tool call id.
    pub(crate) fn extend_tool_call(
        &mut self,
        event_idx: usize,
        tool_call_id: Option<&str>,
        tool_name_delta: Option<&str>,
        args_delta: Option<&str>,
    ) -> Result<(), ReassemblyError> {
        let node = self.idx;
        let call = self
            .parts
            .get_mut(&event_idx)
            .ok_or(ReassemblyError::UnknownPart { node, event_idx })?;

        if tool_call_id != Some(call.tool_call_id.as_str()) {
            return Err(ReassemblyError::ToolCallIdMismatch {
                event_idx,
                expected: call.tool_call_id.clone(),
                actual: tool_call_id.map(ToString::to_string),
            });
        }
        if let Some(fragment) = tool_name_delta.filter(|f| !f.is_empty()) {
            call.tool_name.push_str(fragment);
        }
        if let Some(fragment) = args_delta.filter(|f| !f.is_empty()) {
            call.args.push_str(fragment);
        }
        Ok(())
    }

    /// Bodies of the buffered tool calls, in ascending part index.
    ///
    /// Parses every call before returning so a malformed one publishes
    /// nothing.
    pub(crate) fn tool_call_bodies(&self) -> Result<Vec<Value>, ReassemblyError> {
        self.parts
            .iter()
            .map(|(&event_idx, call)| -> Result<Value, ReassemblyError> {
                let event = self
                    .events
                    .get(&event_idx)
                    .cloned()
                    .unwrap_or_else(|| "part_start".to_string());
                let mut body = Map::new();
                body.insert("idx".into(), json!(self.idx));
                body.insert("event".into(), json!(event));
                body.insert("event_idx".into(), json!(event_idx));
                body.insert("part_kind".into(), json!(call.part_kind));
                body.insert("tool_name".into(), json!(call.tool_name));
                body.insert("tool_call_id".into(), json!(call.tool_call_id));
                body.insert("args".into(), call.parsed_args(event_idx)?);
                Ok(Value::Object(body))
            })
            .collect()
    }

    pub(crate) fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Nodes of one agent run, in order. The last one is current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Runtime {
    nodes: Vec<Node>,
}

impl Runtime {
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn current(&self) -> Option<&Node> {
        self.nodes.last()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Node> {
        self.nodes.last_mut()
    }

    /// Append a new node indexed after the existing ones.
    pub(crate) fn push_node(&mut self) -> &mut Node {
        let idx = self.nodes.len();
        self.nodes.push(Node::new(idx));
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }
}
