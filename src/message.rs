//! Conversation state.
//!
//! A [`Conversation`] is an append-only sequence of [`Message`]s. Roles are a
//! closed set; provider mapping and rendering match on the variant.
//!
//! # JSON shape
//!
//! ```json
//! {"role": "user", "content": "what's the weather in Paris?"}
//! {"role": "assistant", "content": "", "tool_calls": [{"id": "call_1", "name": "weather_forecast", "args": {"location": "Paris"}}]}
//! {"role": "tool", "call_id": "call_1", "name": "weather_forecast", "payload": {"result": "Weather forecast for Paris: ..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request from the model to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolPayload {
    #[serde(rename = "result")]
    Success(Value),
    #[serde(rename = "error")]
    Error(String),
}

impl ToolPayload {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolPayload::Error(_))
    }

    /// `{"result": v}` or `{"error": msg}`; the form handed back to the model.
    pub fn to_json(&self) -> Value {
        match self {
            ToolPayload::Success(v) => serde_json::json!({ "result": v }),
            ToolPayload::Error(e) => serde_json::json!({ "error": e }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        name: String,
        payload: ToolPayload,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Assistant reply without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(call: &ToolCall, payload: ToolPayload) -> Self {
        Message::Tool {
            call_id: call.id.clone(),
            name: call.name.clone(),
            payload,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Tool calls requested by an assistant message; empty for other roles.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Plain-text rendering for terminals and logs.
    pub fn text(&self) -> String {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. } => content.clone(),
            Message::Tool { payload, .. } => match payload {
                ToolPayload::Success(Value::String(s)) => s.clone(),
                ToolPayload::Success(v) => v.to_string(),
                ToolPayload::Error(e) => format!("error: {}", e),
            },
        }
    }
}

/// Append-only message history for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
