use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use parley_agent::{
    AgentError, CompletionChunk, CompletionRequest, CompletionService, CompletionStream,
    ConversationContext, FinishReason, Role, SpokenReply, ToolCallDelta, ToolCallLoop,
    ToolDefinition, ToolHandler, ToolRegistry, TurnInput,
};
use serde_json::{json, Value};

/// Plays back one scripted chunk list per completion request.
#[derive(Default)]
struct Scripted {
    rounds: Mutex<VecDeque<Vec<CompletionChunk>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Scripted {
    fn new(rounds: Vec<Vec<CompletionChunk>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::default(),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for Scripted {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, AgentError> {
        self.requests.lock().unwrap().push(request);
        let chunks = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Completion("script exhausted".to_string()))?;
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Records the arguments of every call and answers with a fixed result.
struct Recorder {
    calls: Mutex<Vec<Value>>,
    result: Result<Value, String>,
}

impl Recorder {
    fn ok(result: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::default(),
            result: Ok(result),
        })
    }
}

#[async_trait]
impl ToolHandler for Recorder {
    async fn call(&self, arguments: Value) -> Result<Value, AgentError> {
        self.calls.lock().unwrap().push(arguments);
        self.result.clone().map_err(|message| AgentError::Tool {
            name: "checkDate".to_string(),
            message,
        })
    }
}

fn args(fragment: &str) -> CompletionChunk {
    CompletionChunk::tool_call(ToolCallDelta {
        arguments: Some(fragment.to_string()),
        ..ToolCallDelta::default()
    })
}

fn tool_call_round(name: &str, fragments: &[&str]) -> Vec<CompletionChunk> {
    let mut chunks = vec![CompletionChunk::tool_call(ToolCallDelta {
        id: Some("call_1".to_string()),
        name: Some(name.to_string()),
        arguments: Some(String::new()),
    })];
    chunks.extend(fragments.iter().map(|f| args(f)));
    chunks.push(CompletionChunk::finish(FinishReason::ToolCalls));
    chunks
}

fn answer_round(parts: &[&str]) -> Vec<CompletionChunk> {
    let mut chunks: Vec<CompletionChunk> = parts.iter().map(|p| CompletionChunk::content(*p)).collect();
    chunks.push(CompletionChunk::finish(FinishReason::Stop));
    chunks
}

fn registry_with(handler: Arc<dyn ToolHandler>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new("checkDate", "Checks whether a date is open.")
            .with_say("Let me check that date."),
        handler,
    );
    Arc::new(registry)
}

fn context() -> ConversationContext {
    let mut context = ConversationContext::new("be brief", "hello");
    context.bind_call("CA1");
    context
}

#[tokio::test]
async fn concatenated_arguments_yield_one_tool_turn() {
    let completion = Scripted::new(vec![
        tool_call_round("checkDate", &[r#"{"a":"#, r#"1}{"b""#, r#":2}"#]),
        answer_round(&["That date is open. •", " Shall I book it?"]),
    ]);
    let handler = Recorder::ok(json!({"status": "success", "open": true}));
    let mut tool_loop = ToolCallLoop::new(completion.clone(), registry_with(handler.clone()), 5);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    let outcome = tool_loop
        .run(&mut ctx, TurnInput::user("I need to check a date"), 0, &mut replies)
        .await
        .unwrap();

    assert_eq!(*handler.calls.lock().unwrap(), vec![json!({"a": 1})]);
    assert_eq!(ctx.count(Role::Tool), 1);
    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(outcome.replies, 2);

    let spoken: Vec<(Option<u64>, &str)> =
        replies.iter().map(|r| (r.index, r.text.as_str())).collect();
    assert_eq!(
        spoken,
        vec![
            (None, "Let me check that date."),
            (Some(0), "That date is open."),
            (Some(1), "Shall I book it?"),
        ]
    );

    // The follow-up request carries the tool result; the answer is recorded once.
    let requests = completion.requests.lock().unwrap();
    let follow_up = &requests[1].messages;
    let tool_turn = follow_up.last().unwrap();
    assert_eq!(tool_turn.role, Role::Tool);
    assert_eq!(tool_turn.tool_call_id.as_deref(), Some("call_1"));
    let last = ctx.turns().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content.as_deref(), Some("That date is open. • Shall I book it?"));
    assert_eq!(ctx.count(Role::Assistant), 3);
}

#[tokio::test]
async fn missing_handler_fails_the_turn() {
    let completion = Scripted::new(vec![tool_call_round("ghost", &["{}"])]);
    let mut registry = ToolRegistry::new();
    registry.add_definition(ToolDefinition::new("ghost", "advertised only").with_say("One moment."));
    let mut tool_loop = ToolCallLoop::new(completion, Arc::new(registry), 5);
    let mut ctx = context();
    let before = ctx.len();
    let mut replies: Vec<SpokenReply> = Vec::new();

    let err = tool_loop
        .run(&mut ctx, TurnInput::user("hello?"), 0, &mut replies)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ToolNotFound(ref name) if name == "ghost"));
    assert!(replies.is_empty());
    assert_eq!(ctx.len(), before + 1);
    assert_eq!(ctx.count(Role::Tool), 0);
}

#[tokio::test]
async fn handler_error_becomes_error_result() {
    let completion = Scripted::new(vec![
        tool_call_round("checkDate", &[r#"{"date":"2025-07-20"}"#]),
        answer_round(&["Sorry, I couldn't check that."]),
    ]);
    let handler = Arc::new(Recorder {
        calls: Mutex::default(),
        result: Err("calendar offline".to_string()),
    });
    let mut tool_loop = ToolCallLoop::new(completion, registry_with(handler), 5);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    tool_loop
        .run(&mut ctx, TurnInput::user("is the 20th free"), 0, &mut replies)
        .await
        .unwrap();

    let tool_turn = ctx.turns().iter().find(|t| t.role == Role::Tool).unwrap();
    let result: Value = serde_json::from_str(tool_turn.content.as_deref().unwrap()).unwrap();
    assert_eq!(result["status"], "error");
    assert!(result["message"].as_str().unwrap().contains("calendar offline"));
}

struct EndlessTools {
    calls: Mutex<usize>,
}

#[async_trait]
impl CompletionService for EndlessTools {
    async fn stream(&self, _request: CompletionRequest) -> Result<CompletionStream, AgentError> {
        *self.calls.lock().unwrap() += 1;
        Ok(futures_util::stream::iter(tool_call_round("checkDate", &["{}"]).into_iter().map(Ok)).boxed())
    }
}

#[tokio::test]
async fn tool_rounds_are_bounded() {
    let completion = Arc::new(EndlessTools {
        calls: Mutex::new(0),
    });
    let handler = Recorder::ok(json!({"status": "success"}));
    let mut tool_loop = ToolCallLoop::new(completion.clone(), registry_with(handler.clone()), 2);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    let err = tool_loop
        .run(&mut ctx, TurnInput::user("loop forever"), 0, &mut replies)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ToolLoopExhausted(2)));
    assert_eq!(*completion.calls.lock().unwrap(), 3);
    // The third request asks for a tool past the limit; it is never run.
    assert_eq!(handler.calls.lock().unwrap().len(), 2);
    assert_eq!(replies.iter().filter(|r| r.index.is_none()).count(), 2);
    assert_eq!(ctx.count(Role::Tool), 2);
}

#[tokio::test]
async fn zero_tool_rounds_refuses_every_tool() {
    let completion = Scripted::new(vec![tool_call_round("checkDate", &["{}"])]);
    let handler = Recorder::ok(json!({"status": "success"}));
    let mut tool_loop = ToolCallLoop::new(completion, registry_with(handler.clone()), 0);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    let err = tool_loop
        .run(&mut ctx, TurnInput::user("check the 3rd"), 0, &mut replies)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ToolLoopExhausted(0)));
    assert!(handler.calls.lock().unwrap().is_empty());
    assert!(replies.is_empty());
}

#[tokio::test]
async fn reply_indices_keep_rising_across_turns() {
    let completion = Scripted::new(vec![
        answer_round(&["Hi. •", " How can I help?"]),
        answer_round(&["", "Sure."]),
    ]);
    let mut tool_loop =
        ToolCallLoop::new(completion.clone(), Arc::new(ToolRegistry::new()), 5);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    tool_loop.run(&mut ctx, TurnInput::user("hello"), 0, &mut replies).await.unwrap();
    tool_loop.run(&mut ctx, TurnInput::user("book me"), 1, &mut replies).await.unwrap();

    let indices: Vec<(Option<u64>, u64)> =
        replies.iter().map(|r| (r.index, r.interaction_count)).collect();
    assert_eq!(indices, vec![(Some(0), 0), (Some(1), 0), (Some(2), 1)]);
    assert_eq!(completion.request_count(), 2);
}

#[tokio::test]
async fn completion_failure_leaves_no_reply() {
    let completion = Scripted::new(Vec::new());
    let mut tool_loop = ToolCallLoop::new(completion, Arc::new(ToolRegistry::new()), 5);
    let mut ctx = context();
    let mut replies: Vec<SpokenReply> = Vec::new();

    let err = tool_loop
        .run(&mut ctx, TurnInput::user("hello"), 0, &mut replies)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Completion(_)));
    assert!(replies.is_empty());
}
