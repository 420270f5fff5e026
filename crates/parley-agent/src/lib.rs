//! Conversation engine for Parley calls.
//!
//! [`ToolCallLoop`] streams a chat completion over the call's
//! [`ConversationContext`], speaks replies through a [`ReplySink`] as they
//! form, and runs tools from the [`ToolRegistry`] when the model asks for
//! them.

pub mod args;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod tool_loop;
pub mod tools;

pub use args::parse_tool_arguments;
pub use completion::{
    CompletionChunk, CompletionRequest, CompletionService, CompletionStream, FinishReason,
    OpenAiCompletion, ToolCallDelta,
};
pub use config::{AgentConfig, OpenAiConfig};
pub use context::{ChatTurn, ConversationContext, Role, ToolCallRecord};
pub use error::AgentError;
pub use tool_loop::{ReplySink, SpokenReply, ToolCallLoop, TurnInput, TurnOutcome, SOFT_BOUNDARY};
pub use tools::{builtin_tools, StaticListTool, ToolDefinition, ToolHandler, ToolRegistry};
