//! Chat messages stored in conversation state fields

use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

impl Role {
    fn prefix(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::Human => "Human",
            Role::Ai => "AI",
            Role::Tool => "Tool",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    /// Optional speaker name, e.g. `expert`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by an AI message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call answered by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    /// Result of a tool call
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn is_ai(&self) -> bool {
        self.role == Role::Ai
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// JSON form as stored in state
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.to_value()
    }
}

/// Decode the message list held in `state[field]`.
///
/// A missing field yields an empty list.
pub fn messages_from_state(state: &Value, field: &str) -> serde_json::Result<Vec<Message>> {
    match state.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()),
    }
}

/// Partial update appending messages to a list field
pub fn messages_update(field: &str, messages: impl IntoIterator<Item = Message>) -> Value {
    let list: Vec<Value> = messages.into_iter().map(Value::from).collect();
    let mut update = serde_json::Map::new();
    update.insert(field.to_string(), Value::Array(list));
    Value::Object(update)
}

/// Render a transcript, one `Prefix: content` line per message
pub fn buffer_string(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match &m.name {
            Some(name) if m.role == Role::Ai => format!("{} ({}): {}", m.role.prefix(), name, m.content),
            _ => format!("{}: {}", m.role.prefix(), m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_round_trip_through_state() {
        let state = json!({
            "messages": [
                Message::human("So you said you were writing an article?").to_value(),
                Message::ai("Yes.").with_name("expert").to_value(),
            ]
        });

        let messages = messages_from_state(&state, "messages").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].name.as_deref(), Some("expert"));
        assert!(messages_from_state(&state, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_buffer_string() {
        let transcript = buffer_string(&[
            Message::human("Hi"),
            Message::ai("Hello").with_name("expert"),
            Message::system("ignored?"),
        ]);
        assert_eq!(transcript, "Human: Hi\nAI (expert): Hello\nSystem: ignored?");
    }

    #[test]
    fn test_messages_update_shape() {
        let update = messages_update("messages", [Message::ai("done")]);
        assert_eq!(update["messages"][0]["role"], "ai");
        assert_eq!(update["messages"][0]["content"], "done");
    }
}
