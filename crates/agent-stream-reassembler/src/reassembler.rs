//! Turns generation events into published envelopes.

use agent_stream_core::{
    EnvelopeType, SessionKey,
    messages::{
        AgentStreamEvent, ModelRequest, PartDelta, RequestPart, ResponsePart, TextPart,
        ThinkingPart, ToolReturnPart,
    },
};
use agent_stream_transport::{StreamError, StreamWriter};
use serde_json::{Value, json};
use thiserror::Error;

use crate::node::{PendingToolCall, Runtime};

/// Reassembly error.
///
/// Everything except `Stream` means producer and reassembler disagree about
/// the event sequence; the run cannot continue meaningfully.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("No node has begun")]
    NoActiveNode,
    #[error("Node {0} is already stopped")]
    NodeStopped(usize),
    #[error("Node {node} has no buffered tool call at part {event_idx}")]
    UnknownPart { node: usize, event_idx: usize },
    #[error("Tool call id mismatch at part {event_idx}: expected {expected}, got {actual:?}")]
    ToolCallIdMismatch {
        event_idx: usize,
        expected: String,
        actual: Option<String>,
    },
    #[error("Invalid tool call arguments at part {event_idx}: {source}")]
    InvalidArgs {
        event_idx: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Identity of the session a run streams to.
///
/// Implemented by the application's dependency object.
pub trait StreamDeps: Send + Sync {
    fn scope_id(&self) -> i64;

    fn user_id(&self) -> i64;

    fn session_id(&self) -> &str;

    /// Key of the session log.
    fn session_key(&self) -> SessionKey {
        SessionKey::new(self.scope_id(), self.user_id(), self.session_id())
    }
}

impl StreamDeps for SessionKey {
    fn scope_id(&self) -> i64 {
        self.scope_id
    }

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Reassembles one run's generation events into `event` envelopes.
///
/// Drive it node by node: [`node_begin`](Self::node_begin), any number of
/// [`node_event`](Self::node_event), then [`node_end`](Self::node_end).
/// Text and thinking fragments are published immediately; tool calls are
/// buffered and published whole, with parsed arguments, when the node ends.
pub struct Reassembler {
    writer: StreamWriter,
    key: SessionKey,
    runtime: Runtime,
}

impl Reassembler {
    /// Create a reassembler for a session.
    #[must_use]
    pub const fn new(writer: StreamWriter, key: SessionKey) -> Self {
        Self {
            writer,
            key,
            runtime: Runtime::new(),
        }
    }

    /// Create a reassembler for the session described by `deps`.
    #[must_use]
    pub fn for_deps<D: StreamDeps + ?Sized>(writer: StreamWriter, deps: &D) -> Self {
        Self::new(writer, deps.session_key())
    }

    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[must_use]
    pub const fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    /// Whether the session's liveness flag has been cleared by a cancel.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn is_cancelled(&self) -> Result<bool, ReassemblyError> {
        Ok(!self.writer.is_live(&self.key).await?)
    }

    async fn publish(&self, body: Value) -> Result<(), ReassemblyError> {
        let origin = &self.writer.config().framework_origin;
        self.writer
            .add(&self.key, EnvelopeType::Event, origin, Some(body))
            .await?;
        Ok(())
    }

    /// Open a node for a model request.
    ///
    /// Publishes `llm-begin`, then one envelope per tool result carried by
    /// the request. Returns the node index.
    ///
    /// # Errors
    /// Returns error if publishing fails.
    pub async fn node_begin(&mut self, request: &ModelRequest) -> Result<usize, ReassemblyError> {
        if let Some(previous) = self.runtime.current().filter(|node| !node.is_stopped()) {
            tracing::warn!(node = previous.idx(), "Beginning a node while the previous is open");
        }
        let idx = self.runtime.push_node().idx();
        tracing::debug!(session = %self.key, node = idx, "Node begin");

        self.publish(json!({ "idx": idx, "event": "llm-begin" }))
            .await?;

        for part in &request.parts {
            if let RequestPart::ToolReturn(ToolReturnPart {
                tool_name,
                content,
                tool_call_id,
            }) = part
            {
                self.publish(json!({
                    "idx": idx,
                    "part_kind": part.part_kind(),
                    "tool_name": tool_name,
                    "tool_call_id": tool_call_id,
                    "content": content,
                }))
                .await?;
            }
        }
        Ok(idx)
    }

    /// Feed one generation event to the current node.
    ///
    /// Unknown event, part and delta kinds are logged and skipped.
    ///
    /// # Errors
    /// Returns error if no node is open, a tool-call delta does not match
    /// its buffered call, or publishing fails.
    pub async fn node_event(&mut self, event: &AgentStreamEvent) -> Result<(), ReassemblyError> {
        let node = self
            .runtime
            .current_mut()
            .ok_or(ReassemblyError::NoActiveNode)?;
        if node.is_stopped() {
            return Err(ReassemblyError::NodeStopped(node.idx()));
        }
        let idx = node.idx();
        let event_kind = event.event_kind();

        let body = match event {
            AgentStreamEvent::PartStart { index, part } => {
                node.record_event(*index, event_kind);
                match part {
                    ResponsePart::Text(TextPart { content })
                    | ResponsePart::Thinking(ThinkingPart { content, .. }) => Some(json!({
                        "idx": idx,
                        "event": event_kind,
                        "event_idx": index,
                        "part_kind": part.part_kind(),
                        "content": content,
                    })),
                    ResponsePart::ToolCall(call) => {
                        node.buffer_tool_call(*index, PendingToolCall::from_part(call));
                        None
                    }
                    ResponsePart::Unknown => {
                        tracing::warn!(node = idx, event_idx = index, "Unknown part kind");
                        None
                    }
                }
            }
            AgentStreamEvent::PartDelta { index, delta } => match delta {
                PartDelta::Text { content_delta } => Some(json!({
                    "idx": idx,
                    "event": event_kind,
                    "event_idx": index,
                    "part_delta_kind": delta.part_delta_kind(),
                    "content_delta": content_delta,
                })),
                PartDelta::Thinking { content_delta, .. } => Some(json!({
                    "idx": idx,
                    "event": event_kind,
                    "event_idx": index,
                    "part_delta_kind": delta.part_delta_kind(),
                    "content_delta": content_delta,
                })),
                PartDelta::ToolCall {
                    tool_name_delta,
                    args_delta,
                    tool_call_id,
                } => {
                    node.extend_tool_call(
                        *index,
                        tool_call_id.as_deref(),
                        tool_name_delta.as_deref(),
                        args_delta.as_deref(),
                    )?;
                    None
                }
                PartDelta::Unknown => {
                    tracing::warn!(node = idx, event_idx = index, "Unknown part delta kind");
                    None
                }
            },
            AgentStreamEvent::FinalResult { .. } => Some(json!({ "idx": idx, "event": "answer" })),
            other => {
                tracing::error!(event_kind = other.event_kind(), node = idx, "Unknown event type");
                None
            }
        };

        if let Some(body) = body {
            self.publish(body).await?;
        }
        Ok(())
    }

    /// Close the current node.
    ///
    /// Publishes every buffered tool call in ascending part index, then
    /// `llm-end`, and marks the node stopped. A `{}` left by the initial
    /// argument snapshot is dropped before parsing when more text follows.
    ///
    /// # Errors
    /// Returns error if no node is open, the node is already stopped,
    /// buffered arguments are not JSON, or publishing fails.
    pub async fn node_end(&mut self) -> Result<(), ReassemblyError> {
        let node = self.runtime.current().ok_or(ReassemblyError::NoActiveNode)?;
        if node.is_stopped() {
            return Err(ReassemblyError::NodeStopped(node.idx()));
        }
        let idx = node.idx();
        let bodies = node.tool_call_bodies()?;

        for body in bodies {
            self.publish(body).await?;
        }
        self.publish(json!({ "idx": idx, "event": "llm-end" }))
            .await?;

        if let Some(node) = self.runtime.current_mut() {
            node.stop();
        }
        tracing::debug!(session = %self.key, node = idx, "Node end");
        Ok(())
    }

    /// Publish an `error` envelope from the configured relay origin.
    ///
    /// Usable at any time, also before the first node.
    ///
    /// # Errors
    /// Returns error if publishing fails.
    pub async fn add_error(&self, body: Value) -> Result<(), ReassemblyError> {
        let origin = self.writer.config().origin.clone();
        self.add_error_from(body, &origin).await
    }

    /// Publish an `error` envelope from a custom origin.
    ///
    /// # Errors
    /// Returns error if publishing fails.
    pub async fn add_error_from(&self, body: Value, origin: &str) -> Result<(), ReassemblyError> {
        self.writer
            .add(&self.key, EnvelopeType::Error, origin, Some(body))
            .await?;
        Ok(())
    }

    /// Publish an `info` envelope from the configured relay origin.
    ///
    /// # Errors
    /// Returns error if publishing fails.
    pub async fn add_info(&self, body: Value) -> Result<(), ReassemblyError> {
        let origin = self.writer.config().origin.clone();
        self.add_info_from(body, &origin).await
    }

    /// Publish an `info` envelope from a custom origin.
    ///
    /// # Errors
    /// Returns error if publishing fails.
    pub async fn add_info_from(&self, body: Value, origin: &str) -> Result<(), ReassemblyError> {
        self.writer
            .add(&self.key, EnvelopeType::Info, origin, Some(body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_stream_core::{
        Envelope, LogStore, MemoryLogStore, StreamConfig,
        messages::{ToolArgs, ToolCallPart, UserContent, UserPromptPart},
    };
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    struct Harness {
        store: Arc<MemoryLogStore>,
        reassembler: Reassembler,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryLogStore::new());
            let writer = StreamWriter::new(store.clone(), Arc::new(StreamConfig::default()));
            let reassembler = Reassembler::new(writer, SessionKey::new(42, 1, "sess"));
            Self { store, reassembler }
        }

        async fn envelopes(&self) -> Vec<Envelope> {
            self.store
                .range("agx:42:1:sess")
                .await
                .unwrap()
                .iter()
                .map(|entry| Envelope::from_fields(&entry.fields).unwrap())
                .collect()
        }

        async fn bodies(&self) -> Vec<Value> {
            self.envelopes()
                .await
                .into_iter()
                .filter_map(|envelope| envelope.body)
                .collect()
        }
    }

    fn tool_call_start(index: usize, id: &str, name: &str, args: Option<ToolArgs>) -> AgentStreamEvent {
        AgentStreamEvent::PartStart {
            index,
            part: ResponsePart::ToolCall(ToolCallPart {
                tool_name: name.into(),
                args,
                tool_call_id: id.into(),
            }),
        }
    }

    fn args_delta(index: usize, id: &str, fragment: &str) -> AgentStreamEvent {
        AgentStreamEvent::PartDelta {
            index,
            delta: PartDelta::ToolCall {
                tool_name_delta: None,
                args_delta: Some(fragment.into()),
                tool_call_id: Some(id.into()),
            },
        }
    }

    fn text_start(index: usize, content: &str) -> AgentStreamEvent {
        AgentStreamEvent::PartStart {
            index,
            part: ResponsePart::Text(TextPart {
                content: content.into(),
            }),
        }
    }

    #[tokio::test]
    async fn test_node_begin_publishes_tool_returns() {
        let mut h = Harness::new();
        let request = ModelRequest {
            parts: vec![
                RequestPart::UserPrompt(UserPromptPart {
                    content: UserContent::Text("ignored".into()),
                }),
                RequestPart::ToolReturn(ToolReturnPart {
                    tool_name: "get".into(),
                    content: json!({"temp": 18}),
                    tool_call_id: "T".into(),
                }),
            ],
            instructions: None,
        };

        assert_eq!(assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await), 0);
        assert_ok!(h.reassembler.node_end().await);
        assert_eq!(assert_ok!(h.reassembler.node_begin(&request).await), 1);

        let envelopes = h.envelopes().await;
        assert!(envelopes.iter().all(|e| e.kind == EnvelopeType::Event));
        assert!(envelopes.iter().all(|e| e.origin == "pydantic-ai"));

        let bodies = h.bodies().await;
        assert_eq!(bodies.len(), 4);
        assert_eq!(bodies[2], json!({"idx": 1, "event": "llm-begin"}));
        assert_eq!(
            bodies[3],
            json!({
                "idx": 1,
                "part_kind": "tool-return",
                "tool_name": "get",
                "tool_call_id": "T",
                "content": {"temp": 18},
            })
        );
    }

    #[tokio::test]
    async fn test_text_and_thinking_publish_immediately() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::PartStart {
                    index: 0,
                    part: ResponsePart::Thinking(ThinkingPart {
                        content: "hmm".into(),
                        id: None,
                        signature: Some("sig".into()),
                    }),
                })
                .await
        );
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::PartDelta {
                    index: 0,
                    delta: PartDelta::Thinking {
                        content_delta: None,
                        signature_delta: Some("more".into()),
                    },
                })
                .await
        );
        assert_ok!(h.reassembler.node_event(&text_start(1, "Hel")).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::PartDelta {
                    index: 1,
                    delta: PartDelta::Text {
                        content_delta: "lo".into(),
                    },
                })
                .await
        );

        let bodies = h.bodies().await;
        assert_eq!(
            &bodies[1..],
            &[
                json!({"idx": 0, "event": "part_start", "event_idx": 0, "part_kind": "thinking", "content": "hmm"}),
                json!({"idx": 0, "event": "part_delta", "event_idx": 0, "part_delta_kind": "thinking", "content_delta": null}),
                json!({"idx": 0, "event": "part_start", "event_idx": 1, "part_kind": "text", "content": "Hel"}),
                json!({"idx": 0, "event": "part_delta", "event_idx": 1, "part_delta_kind": "text", "content_delta": "lo"}),
            ]
        );
        assert_eq!(h.reassembler.runtime().nodes()[0].events().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_call_arguments_are_reassembled() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(0, "T", "get", None)).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::PartDelta {
                    index: 0,
                    delta: PartDelta::ToolCall {
                        tool_name_delta: Some("_weather".into()),
                        args_delta: Some(r#"{"weat"#.into()),
                        tool_call_id: Some("T".into()),
                    },
                })
                .await
        );
        assert_ok!(h.reassembler.node_event(&args_delta(0, "T", r#"her":"sf"}"#)).await);

        // Nothing but llm-begin until the node ends.
        assert_eq!(h.bodies().await.len(), 1);
        assert_ok!(h.reassembler.node_end().await);

        let bodies = h.bodies().await;
        assert_eq!(
            bodies[1],
            json!({
                "idx": 0,
                "event": "part_start",
                "event_idx": 0,
                "part_kind": "tool-call",
                "tool_name": "get_weather",
                "tool_call_id": "T",
                "args": {"weather": "sf"},
            })
        );
        assert_eq!(bodies[2], json!({"idx": 0, "event": "llm-end"}));
        assert!(h.reassembler.runtime().nodes()[0].is_stopped());
    }

    #[tokio::test]
    async fn test_snapshot_only_arguments() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(0, "A", "noop", None)).await);
        let full = ToolArgs::Json(r#"{"q": [1, 2]}"#.into());
        assert_ok!(h.reassembler.node_event(&tool_call_start(1, "B", "search", Some(full))).await);
        assert_ok!(h.reassembler.node_end().await);

        let bodies = h.bodies().await;
        assert_eq!(bodies[1]["args"], json!({}));
        assert_eq!(bodies[2]["args"], json!({"q": [1, 2]}));
    }

    #[tokio::test]
    async fn test_flush_in_ascending_part_order() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(3, "C", "third", None)).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(1, "A", "first", None)).await);
        assert_ok!(h.reassembler.node_event(&args_delta(3, "C", r#"{"n":3}"#)).await);
        assert_ok!(h.reassembler.node_event(&text_start(2, "between")).await);
        assert_ok!(h.reassembler.node_event(&args_delta(1, "A", r#"{"n":1}"#)).await);
        assert_ok!(h.reassembler.node_end().await);

        let bodies = h.bodies().await;
        let order: Vec<&str> = bodies
            .iter()
            .filter_map(|body| body.get("tool_name").and_then(Value::as_str))
            .collect();
        assert_eq!(order, vec!["first", "third"]);
        assert_eq!(bodies[1]["part_kind"], "text");
        assert_eq!(bodies[2]["args"], json!({"n": 1}));
        assert_eq!(bodies[3]["args"], json!({"n": 3}));
        assert_eq!(bodies[4], json!({"idx": 0, "event": "llm-end"}));
    }

    #[tokio::test]
    async fn test_tool_call_id_mismatch_is_fatal() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(0, "T", "get", None)).await);

        let err = assert_err!(h.reassembler.node_event(&args_delta(0, "U", "{")).await);
        assert!(matches!(
            err,
            ReassemblyError::ToolCallIdMismatch { event_idx: 0, ref expected, .. } if expected == "T"
        ));

        let err = assert_err!(h.reassembler.node_event(&args_delta(5, "T", "{")).await);
        assert!(matches!(err, ReassemblyError::UnknownPart { node: 0, event_idx: 5 }));
    }

    #[tokio::test]
    async fn test_stopped_node_is_immutable() {
        let mut h = Harness::new();
        assert!(matches!(
            h.reassembler.node_end().await,
            Err(ReassemblyError::NoActiveNode)
        ));
        assert!(matches!(
            h.reassembler.node_event(&text_start(0, "x")).await,
            Err(ReassemblyError::NoActiveNode)
        ));

        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_end().await);
        assert!(matches!(
            h.reassembler.node_end().await,
            Err(ReassemblyError::NodeStopped(0))
        ));
        assert!(matches!(
            h.reassembler.node_event(&text_start(0, "late")).await,
            Err(ReassemblyError::NodeStopped(0))
        ));
        assert_eq!(h.bodies().await.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_arguments_propagate() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(h.reassembler.node_event(&tool_call_start(0, "T", "get", None)).await);
        assert_ok!(h.reassembler.node_event(&args_delta(0, "T", r#"{"city": "#)).await);

        let err = assert_err!(h.reassembler.node_end().await);
        assert!(matches!(err, ReassemblyError::InvalidArgs { event_idx: 0, .. }));
        assert!(!h.reassembler.runtime().nodes()[0].is_stopped());
        assert_eq!(h.bodies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_final_result_and_unknown_events() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::FinalResult {
                    tool_name: None,
                    tool_call_id: None,
                })
                .await
        );
        assert_ok!(h.reassembler.node_event(&AgentStreamEvent::Unknown).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::FunctionToolResult { result: json!(1) })
                .await
        );

        let bodies = h.bodies().await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1], json!({"idx": 0, "event": "answer"}));
    }

    #[tokio::test]
    async fn test_unknown_part_kinds_are_skipped() {
        let mut h = Harness::new();
        assert_ok!(h.reassembler.node_begin(&ModelRequest::default()).await);
        let part_start: AgentStreamEvent = serde_json::from_value(json!({
            "event_kind": "part_start",
            "index": 0,
            "part": {"part_kind": "builtin-tool-call", "tool_name": "web_search"}
        }))
        .unwrap();
        assert_ok!(h.reassembler.node_event(&part_start).await);
        assert_ok!(
            h.reassembler
                .node_event(&AgentStreamEvent::PartDelta {
                    index: 0,
                    delta: PartDelta::Unknown,
                })
                .await
        );
        assert_ok!(h.reassembler.node_event(&text_start(1, "still here")).await);
        assert_ok!(h.reassembler.node_end().await);

        let bodies = h.bodies().await;
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[1]["content"], "still here");
        assert_eq!(bodies[2]["event"], "llm-end");
    }

    #[tokio::test]
    async fn test_error_and_info_outside_nodes() {
        let h = Harness::new();
        assert_ok!(h.reassembler.add_error(json!({"msg": "test error"})).await);
        assert_ok!(h.reassembler.add_error_from(json!({"msg": "custom"}), "myapp").await);
        assert_ok!(h.reassembler.add_info(json!({"status": "processing"})).await);

        let envelopes = h.envelopes().await;
        assert_eq!(envelopes.len(), 3);
        assert_eq!(envelopes[0].kind, EnvelopeType::Error);
        assert_eq!(envelopes[0].origin, "opale");
        assert_eq!(envelopes[0].body, Some(json!({"msg": "test error"})));
        assert_eq!(envelopes[1].origin, "myapp");
        assert_eq!(envelopes[2].kind, EnvelopeType::Info);
        assert_eq!(envelopes[2].body, Some(json!({"status": "processing"})));
    }

    #[tokio::test]
    async fn test_is_cancelled_follows_liveness() {
        let h = Harness::new();
        let writer = h.reassembler.writer().clone();
        let key = h.reassembler.key().clone();

        assert_ok!(writer.start(&key).await);
        assert!(!assert_ok!(h.reassembler.is_cancelled().await));
        assert!(assert_ok!(writer.cancel(&key).await));
        assert!(assert_ok!(h.reassembler.is_cancelled().await));
    }
}
