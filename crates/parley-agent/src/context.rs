//! The running chat transcript of one call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The assistant's request to run a tool, kept so the tool result that
/// follows it can be matched up by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: Option<String>,
    /// Attribution for non-user turns, e.g. the tool that produced a result.
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_call: Option<ToolCallRecord>,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tool_request(call: ToolCallRecord) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_call: Some(call),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: String,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content),
            name: Some(name.into()),
            tool_call_id: Some(call_id.into()),
            tool_call: None,
        }
    }
}

/// Append-only list of chat turns, owned by a single call.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    turns: Vec<ChatTurn>,
}

impl ConversationContext {
    /// Starts a conversation with the system prompt and the greeting the
    /// caller is about to hear.
    pub fn new(system_prompt: &str, greeting: &str) -> Self {
        Self {
            turns: vec![ChatTurn::system(system_prompt), ChatTurn::assistant(greeting)],
        }
    }

    /// Tells the model which call it is handling.
    pub fn bind_call(&mut self, call_sid: &str) {
        self.push(ChatTurn::system(format!("callSid: {call_sid}")));
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn count(&self, role: Role) -> usize {
        self.turns.iter().filter(|t| t.role == role).count()
    }
}
