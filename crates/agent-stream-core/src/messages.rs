//! Agent framework messages and generation events.
//!
//! These mirror the JSON the agent framework produces: messages are tagged
//! by `kind`, message parts by `part_kind`, stream events by `event_kind`
//! and part deltas by `part_delta_kind`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One message of a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelMessage {
    /// Sent to the model.
    Request(ModelRequest),
    /// Produced by the model.
    Response(ModelResponse),
}

impl ModelMessage {
    /// Wire name of the message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
        }
    }
}

/// Request message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub parts: Vec<RequestPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ModelRequest {
    /// Request made of a single user prompt.
    #[must_use]
    pub fn user_prompt(content: impl Into<String>) -> Self {
        Self {
            parts: vec![RequestPart::UserPrompt(UserPromptPart {
                content: UserContent::Text(content.into()),
            })],
            instructions: None,
        }
    }
}

/// Response message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub parts: Vec<ResponsePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// Part of a request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum RequestPart {
    SystemPrompt(SystemPromptPart),
    UserPrompt(UserPromptPart),
    ToolReturn(ToolReturnPart),
    RetryPrompt(RetryPromptPart),
}

impl RequestPart {
    /// Wire name of the part kind.
    #[must_use]
    pub const fn part_kind(&self) -> &'static str {
        match self {
            Self::SystemPrompt(_) => "system-prompt",
            Self::UserPrompt(_) => "user-prompt",
            Self::ToolReturn(_) => "tool-return",
            Self::RetryPrompt(_) => "retry-prompt",
        }
    }
}

/// Part of a response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum ResponsePart {
    Text(TextPart),
    Thinking(ThinkingPart),
    ToolCall(ToolCallPart),
    /// Any part kind this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl ResponsePart {
    /// Wire name of the part kind.
    #[must_use]
    pub const fn part_kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Thinking(_) => "thinking",
            Self::ToolCall(_) => "tool-call",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPromptPart {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPromptPart {
    pub content: UserContent,
}

/// User prompt content: plain text or a list of multi-modal items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Items(Vec<Value>),
}

impl UserContent {
    /// Textual content. For item lists, the string items joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Items(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnPart {
    pub tool_name: String,
    pub content: Value,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPromptPart {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingPart {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    #[serde(default)]
    pub args: Option<ToolArgs>,
    pub tool_call_id: String,
}

impl ToolCallPart {
    /// Arguments rendered as JSON text; `{}` when none are known yet.
    #[must_use]
    pub fn args_as_json_str(&self) -> String {
        match &self.args {
            Some(ToolArgs::Json(raw)) if !raw.is_empty() => raw.clone(),
            Some(ToolArgs::Object(map)) if !map.is_empty() => {
                Value::Object(map.clone()).to_string()
            }
            _ => "{}".to_string(),
        }
    }
}

/// Tool-call arguments: raw JSON text or an already-parsed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArgs {
    Json(String),
    Object(Map<String, Value>),
}

/// Generation event emitted while a model response streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_kind", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// A new part begins at `index`.
    PartStart { index: usize, part: ResponsePart },
    /// A fragment for the part at `index`.
    PartDelta { index: usize, delta: PartDelta },
    /// The model started producing the final result.
    FinalResult {
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    /// A tool is about to be called.
    FunctionToolCall { part: ToolCallPart },
    /// A tool call returned.
    FunctionToolResult { result: Value },
    /// Any event kind this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl AgentStreamEvent {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn event_kind(&self) -> &'static str {
        match self {
            Self::PartStart { .. } => "part_start",
            Self::PartDelta { .. } => "part_delta",
            Self::FinalResult { .. } => "final_result",
            Self::FunctionToolCall { .. } => "function_tool_call",
            Self::FunctionToolResult { .. } => "function_tool_result",
            Self::Unknown => "unknown",
        }
    }
}

/// Incremental fragment of a response part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_delta_kind", rename_all = "snake_case")]
pub enum PartDelta {
    Text {
        content_delta: String,
    },
    Thinking {
        #[serde(default)]
        content_delta: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature_delta: Option<String>,
    },
    ToolCall {
        #[serde(default)]
        tool_name_delta: Option<String>,
        #[serde(default)]
        args_delta: Option<String>,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    /// Any delta kind this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl PartDelta {
    /// Wire name of the delta kind.
    #[must_use]
    pub const fn part_delta_kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::Unknown => "unknown",
        }
    }
}
