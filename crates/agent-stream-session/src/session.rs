//! Conversation history and the session abstraction.

use agent_stream_core::messages::{ModelMessage, RequestPart};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::StorageError;

/// Title used when a history has no user prompt to show.
pub const DEFAULT_TITLE: &str = "No title";

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("History codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Invalid history: {0}")]
    InvalidHistory(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Ordered conversation messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(Vec<ModelMessage>);

impl History {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append messages in order.
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = ModelMessage>) {
        self.0.extend(messages);
    }

    /// JSON array of the messages.
    ///
    /// # Errors
    /// Returns error if a message cannot be encoded.
    pub fn to_json(&self) -> Result<Vec<u8>, SessionError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Parse a JSON array produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid message list.
    pub fn from_json(data: &[u8]) -> Result<Self, SessionError> {
        Ok(Self(serde_json::from_slice(data)?))
    }

    /// Text of the first user prompt in the first message, or
    /// [`DEFAULT_TITLE`].
    #[must_use]
    pub fn user_prompt(&self) -> String {
        let Some(ModelMessage::Request(request)) = self.0.first() else {
            return DEFAULT_TITLE.to_string();
        };
        request
            .parts
            .iter()
            .find_map(|part| match part {
                RequestPart::UserPrompt(prompt) => Some(prompt.content.text()),
                _ => None,
            })
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    /// Display nodes for this history; see [`nodes_from_msgs`].
    ///
    /// # Errors
    /// Returns error if the history is not a sequence of request/response
    /// pairs.
    pub fn to_nodes(&self) -> Result<Vec<Value>, SessionError> {
        let msgs = self
            .0
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        nodes_from_msgs(&msgs)
    }
}

impl From<Vec<ModelMessage>> for History {
    fn from(messages: Vec<ModelMessage>) -> Self {
        Self(messages)
    }
}

/// Flatten request/response pairs into display nodes.
///
/// Each node carries the response's fields with `kind` set to null and
/// `parts` replaced by the request parts followed by the response parts.
/// System prompts are dropped and every kept part gets `signature: null`.
///
/// # Errors
/// Returns error on an odd number of messages, a pair that is not
/// request then response, or a message that is not an object.
pub fn nodes_from_msgs(msgs: &[Value]) -> Result<Vec<Value>, SessionError> {
    if msgs.len() % 2 != 0 {
        return Err(SessionError::InvalidHistory(format!(
            "expected request/response pairs, got {} messages",
            msgs.len()
        )));
    }

    msgs.chunks_exact(2)
        .enumerate()
        .map(|(n, pair)| -> Result<Value, SessionError> {
            let request = expect_kind(&pair[0], "request", 2 * n)?;
            let response = expect_kind(&pair[1], "response", 2 * n + 1)?;

            let parts: Vec<Value> = parts_of(request)
                .chain(parts_of(response))
                .filter(|part| part.get("part_kind").and_then(Value::as_str) != Some("system-prompt"))
                .map(|part| {
                    let mut part = part.clone();
                    if let Value::Object(fields) = &mut part {
                        fields.insert("signature".into(), Value::Null);
                    }
                    part
                })
                .collect();

            let mut node = response.clone();
            node.insert("kind".into(), Value::Null);
            node.insert("parts".into(), Value::Array(parts));
            Ok(Value::Object(node))
        })
        .collect()
}

fn expect_kind<'a>(
    msg: &'a Value,
    kind: &str,
    position: usize,
) -> Result<&'a Map<String, Value>, SessionError> {
    let fields = msg.as_object().ok_or_else(|| {
        SessionError::InvalidHistory(format!("message {position} is not an object"))
    })?;
    match fields.get("kind").and_then(Value::as_str) {
        Some(found) if found == kind => Ok(fields),
        found => Err(SessionError::InvalidHistory(format!(
            "message {position}: expected kind {kind}, got {}",
            found.unwrap_or("none")
        ))),
    }
}

fn parts_of(msg: &Map<String, Value>) -> impl Iterator<Item = &Value> {
    msg.get("parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// A conversation whose history persists between runs.
///
/// Implementors supply storage through [`load`](Self::load) and
/// [`save`](Self::save); the history helpers come for free.
#[async_trait]
pub trait Session: Send + Sync {
    fn history(&self) -> &History;

    fn history_mut(&mut self) -> &mut History;

    /// Replace the in-memory history with the persisted one.
    async fn load(&mut self) -> Result<(), SessionError>;

    /// Persist the in-memory history.
    async fn save(&self) -> Result<(), SessionError>;

    fn add_messages(&mut self, messages: Vec<ModelMessage>) {
        self.history_mut().add_messages(messages);
    }

    fn get_user_prompt(&self) -> String {
        self.history().user_prompt()
    }
}

#[cfg(test)]
mod tests {
    use agent_stream_core::messages::{
        ModelRequest, ModelResponse, ResponsePart, SystemPromptPart, TextPart, ThinkingPart,
    };
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn exchange(prompt: &str, answer: &str) -> Vec<ModelMessage> {
        vec![
            ModelMessage::Request(ModelRequest::user_prompt(prompt)),
            ModelMessage::Response(ModelResponse {
                parts: vec![ResponsePart::Text(TextPart {
                    content: answer.into(),
                })],
                model_name: Some("test-model".into()),
            }),
        ]
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut history = History::new();
        history.add_messages(exchange("hello", "hi"));
        history.add_messages(exchange("again", "sure"));

        let data = assert_ok!(history.to_json());
        let back = assert_ok!(History::from_json(&data));
        assert_eq!(back, history);
        assert_eq!(back.len(), 4);

        let raw: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(raw[0]["kind"], "request");
        assert_eq!(raw[0]["parts"][0]["part_kind"], "user-prompt");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            History::from_json(b"{\"not\": \"a list\"}"),
            Err(SessionError::Codec(_))
        ));
    }

    #[test]
    fn test_user_prompt() {
        assert_eq!(History::new().user_prompt(), DEFAULT_TITLE);

        let mut history = History::new();
        history.add_messages(vec![ModelMessage::Request(ModelRequest {
            parts: vec![
                RequestPart::SystemPrompt(SystemPromptPart {
                    content: "be brief".into(),
                }),
                RequestPart::UserPrompt(agent_stream_core::messages::UserPromptPart {
                    content: agent_stream_core::messages::UserContent::Text("weather?".into()),
                }),
            ],
            instructions: None,
        })]);
        assert_eq!(history.user_prompt(), "weather?");

        let answer_first = History::from(vec![exchange("q", "a").remove(1)]);
        assert_eq!(answer_first.user_prompt(), DEFAULT_TITLE);
    }

    #[test]
    fn test_nodes_from_msgs_flattens_pairs() {
        let msgs = vec![
            json!({
                "kind": "request",
                "parts": [
                    {"part_kind": "system-prompt", "content": "be brief"},
                    {"part_kind": "user-prompt", "content": "hi"},
                ],
            }),
            json!({
                "kind": "response",
                "model_name": "m",
                "parts": [{"part_kind": "thinking", "content": "...", "signature": "abc"}],
            }),
            json!({"kind": "request", "parts": [{"part_kind": "user-prompt", "content": "more"}]}),
            json!({"kind": "response", "parts": []}),
        ];

        let nodes = assert_ok!(nodes_from_msgs(&msgs));
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            nodes[0],
            json!({
                "kind": null,
                "model_name": "m",
                "parts": [
                    {"part_kind": "user-prompt", "content": "hi", "signature": null},
                    {"part_kind": "thinking", "content": "...", "signature": null},
                ],
            })
        );
        assert_eq!(nodes[1]["parts"].as_array().map(Vec::len), Some(1));
        assert!(
            nodes
                .iter()
                .flat_map(|node| node["parts"].as_array().into_iter().flatten())
                .all(|part| part["signature"].is_null())
        );
    }

    #[test]
    fn test_nodes_from_msgs_rejects_bad_shapes() {
        let request = json!({"kind": "request", "parts": []});
        let response = json!({"kind": "response", "parts": []});

        assert!(assert_ok!(nodes_from_msgs(&[])).is_empty());
        assert_err!(nodes_from_msgs(std::slice::from_ref(&request)));
        assert_err!(nodes_from_msgs(&[response.clone(), request.clone()]));
        assert_err!(nodes_from_msgs(&[request.clone(), request]));
        assert_err!(nodes_from_msgs(&[json!("text"), response]));
    }

    #[test]
    fn test_history_to_nodes() {
        let mut history = History::new();
        history.add_messages(exchange("hello", "hi"));
        let thinking = ModelMessage::Response(ModelResponse {
            parts: vec![ResponsePart::Thinking(ThinkingPart {
                content: "hm".into(),
                id: None,
                signature: Some("sig".into()),
            })],
            model_name: None,
        });

        let nodes = assert_ok!(history.to_nodes());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["parts"][1]["content"], "hi");

        history.add_messages(vec![thinking]);
        assert!(matches!(history.to_nodes(), Err(SessionError::InvalidHistory(_))));
    }
}
