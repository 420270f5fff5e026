//! Tool catalog and handlers offered to the model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Spoken to the caller right before the handler runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            say: None,
            parameters: empty_parameters(),
        }
    }

    pub fn with_say(mut self, say: impl Into<String>) -> Self {
        self.say = Some(say.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// The entry sent in the completion request. `say` stays local.
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, AgentError>;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(definition.name.clone(), handler);
        self.add_definition(definition);
    }

    /// Advertises a tool without a handler.
    pub fn add_definition(&mut self, definition: ToolDefinition) {
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn catalog(&self) -> Vec<Value> {
        self.definitions.iter().map(ToolDefinition::to_openai).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Answers with a fixed, configured list under `key`.
pub struct StaticListTool {
    key: &'static str,
    items: Vec<Value>,
}

impl StaticListTool {
    pub fn new(key: &'static str, items: Vec<Value>) -> Self {
        Self { key, items }
    }
}

#[async_trait]
impl ToolHandler for StaticListTool {
    async fn call(&self, _arguments: Value) -> Result<Value, AgentError> {
        Ok(json!({ "status": "success", self.key: self.items }))
    }
}

/// The tools every call gets.
pub fn builtin_tools(appointment_types: Vec<Value>, staff_members: Vec<Value>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new(
            "listAppointmentTypes",
            "Returns the configured list of appointment types for scheduling.",
        )
        .with_say("Let me pull up the available appointment types."),
        Arc::new(StaticListTool::new("appointment_types", appointment_types)),
    );
    registry.register(
        ToolDefinition::new(
            "listStaffMembers",
            "Returns the configured list of staff members who can take appointments.",
        )
        .with_say("Let me check who is available."),
        Arc::new(StaticListTool::new("staff_members", staff_members)),
    );
    registry
}
