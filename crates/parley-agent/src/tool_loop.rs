//! One conversational turn: stream a completion, run any requested tool,
//! and feed its result back until the model answers in plain text.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::args::parse_tool_arguments;
use crate::completion::{CompletionRequest, CompletionService, FinishReason, ToolCallDelta};
use crate::context::{ChatTurn, ConversationContext, Role, ToolCallRecord};
use crate::error::AgentError;
use crate::tools::ToolRegistry;

/// Marker the model may place in its output where a long reply can be cut
/// into separately spoken segments.
pub const SOFT_BOUNDARY: char = '•';

/// Text ready for speech synthesis.
///
/// `index` orders replies within a call; `None` marks an out-of-band reply
/// (a tool acknowledgement) that plays immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenReply {
    pub index: Option<u64>,
    pub text: String,
    pub interaction_count: u64,
}

/// Receives replies as soon as the loop produces them.
pub trait ReplySink: Send {
    fn speak(&mut self, reply: SpokenReply);
}

impl ReplySink for Vec<SpokenReply> {
    fn speak(&mut self, reply: SpokenReply) {
        self.push(reply);
    }
}

impl ReplySink for mpsc::UnboundedSender<SpokenReply> {
    fn speak(&mut self, reply: SpokenReply) {
        if self.send(reply).is_err() {
            tracing::debug!("reply receiver dropped");
        }
    }
}

/// What starts a turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub text: String,
    pub role: Role,
    /// Attribution recorded for non-user turns.
    pub name: Option<String>,
    /// The input is already in the context.
    pub skip_context_append: bool,
}

impl TurnInput {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::User,
            name: None,
            skip_context_append: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnOutcome {
    /// Indexed replies emitted during the turn.
    pub replies: u64,
    pub tool_rounds: usize,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn absorb(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            self.id.get_or_insert(id);
        }
        if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
            self.name = name;
        }
        if let Some(arguments) = delta.arguments {
            self.arguments.push_str(&arguments);
        }
    }
}

enum Round {
    Answered,
    ToolCalled,
}

/// Drives turns for a single call. Reply indices keep increasing across
/// turns for the life of the loop.
pub struct ToolCallLoop {
    completion: Arc<dyn CompletionService>,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: usize,
    next_reply_index: u64,
}

impl ToolCallLoop {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        tools: Arc<ToolRegistry>,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            completion,
            tools,
            max_tool_rounds,
            next_reply_index: 0,
        }
    }

    pub async fn run(
        &mut self,
        context: &mut ConversationContext,
        input: TurnInput,
        interaction_count: u64,
        sink: &mut dyn ReplySink,
    ) -> Result<TurnOutcome, AgentError> {
        if !input.skip_context_append {
            let mut turn = ChatTurn::new(input.role, input.text);
            if input.role != Role::User {
                if let Some(name) = input.name {
                    turn = turn.with_name(name);
                }
            }
            context.push(turn);
        }

        let first_index = self.next_reply_index;
        let mut outcome = TurnOutcome::default();
        loop {
            let may_invoke = outcome.tool_rounds < self.max_tool_rounds;
            match self.round(context, interaction_count, may_invoke, sink).await? {
                Round::Answered => {
                    outcome.replies = self.next_reply_index - first_index;
                    return Ok(outcome);
                }
                Round::ToolCalled => outcome.tool_rounds += 1,
            }
        }
    }

    async fn round(
        &mut self,
        context: &mut ConversationContext,
        interaction_count: u64,
        may_invoke: bool,
        sink: &mut dyn ReplySink,
    ) -> Result<Round, AgentError> {
        let request = CompletionRequest {
            messages: context.turns().to_vec(),
            tools: self.tools.catalog(),
        };
        let mut stream = self.completion.stream(request).await?;

        let mut complete = String::new();
        let mut partial = String::new();
        let mut call = PendingToolCall::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.tool_call {
                call.absorb(delta);
            }
            if chunk.finish_reason == Some(FinishReason::ToolCalls) {
                drop(stream);
                if !may_invoke {
                    return Err(AgentError::ToolLoopExhausted(self.max_tool_rounds));
                }
                self.invoke_tool(context, call, interaction_count, sink).await?;
                return Ok(Round::ToolCalled);
            }

            let content = chunk.content.unwrap_or_default();
            complete.push_str(&content);
            partial.push_str(&content);
            if content.trim_end().ends_with(SOFT_BOUNDARY)
                || chunk.finish_reason == Some(FinishReason::Stop)
            {
                self.emit(&mut partial, interaction_count, sink);
            }
        }

        self.emit(&mut partial, interaction_count, sink);
        if !complete.trim().is_empty() {
            context.push(ChatTurn::assistant(complete));
        }
        Ok(Round::Answered)
    }

    fn emit(&mut self, partial: &mut String, interaction_count: u64, sink: &mut dyn ReplySink) {
        let text = std::mem::take(partial);
        let text = text.trim().trim_end_matches(SOFT_BOUNDARY).trim_end();
        if text.is_empty() {
            return;
        }
        let index = self.next_reply_index;
        self.next_reply_index += 1;
        sink.speak(SpokenReply {
            index: Some(index),
            text: text.to_string(),
            interaction_count,
        });
    }

    async fn invoke_tool(
        &mut self,
        context: &mut ConversationContext,
        call: PendingToolCall,
        interaction_count: u64,
        sink: &mut dyn ReplySink,
    ) -> Result<(), AgentError> {
        let name = call.name;
        let handler = self
            .tools
            .handler(&name)
            .ok_or_else(|| AgentError::ToolNotFound(name.clone()))?;
        let arguments = parse_tool_arguments(&call.arguments);

        if let Some(say) = self.tools.definition(&name).and_then(|d| d.say.clone()) {
            sink.speak(SpokenReply {
                index: None,
                text: say,
                interaction_count,
            });
        }

        tracing::info!(tool = %name, "invoking tool");
        let result = match handler.call(arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool handler failed");
                json!({ "status": "error", "message": e.to_string() })
            }
        };

        let id = call
            .id
            .unwrap_or_else(|| format!("call_{}", context.count(Role::Tool)));
        context.push(ChatTurn::tool_request(ToolCallRecord {
            id: id.clone(),
            name: name.clone(),
            arguments: serde_json::to_string(&arguments)?,
        }));
        context.push(ChatTurn::tool_result(id, name, serde_json::to_string(&result)?));
        Ok(())
    }
}
