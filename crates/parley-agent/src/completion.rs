//! Streaming chat completion.
//!
//! The OpenAI-compatible client reads the server-sent event stream in a
//! spawned task and forwards parsed chunks through a channel, ending at the
//! `[DONE]` sentinel.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::OpenAiConfig;
use crate::context::{ChatTurn, Role};
use crate::error::AgentError;

/// Longest wait between two events before the stream is abandoned.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    fn parse(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A fragment of a streamed tool invocation. Fields arrive piecemeal and
/// must be concatenated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionChunk {
    pub content: Option<String>,
    pub tool_call: Option<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_call: Some(delta),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatTurn>,
    pub tools: Vec<Value>,
}

pub type CompletionStream = BoxStream<'static, Result<CompletionChunk, AgentError>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, AgentError>;
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
}

impl<'a> From<&'a ChatTurn> for WireMessage<'a> {
    fn from(turn: &'a ChatTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.as_deref(),
            // Tool results are attributed through `tool_call_id`.
            name: turn.name.as_deref().filter(|_| turn.role != Role::Tool),
            tool_call_id: turn.tool_call_id.as_deref(),
            tool_calls: turn
                .tool_call
                .iter()
                .map(|call| WireToolCall {
                    id: &call.id,
                    kind: "function",
                    function: WireFunction {
                        name: &call.name,
                        arguments: &call.arguments,
                    },
                })
                .collect(),
        }
    }
}

/// Builds the JSON body of a streaming chat-completion request.
pub fn request_body(model: &str, request: &CompletionRequest) -> Result<Value, AgentError> {
    let messages: Vec<WireMessage<'_>> = request.messages.iter().map(WireMessage::from).collect();
    let messages = serde_json::to_value(messages)?;
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.clone());
    }
    Ok(body)
}

#[derive(Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<SseToolCall>>,
}

#[derive(Deserialize)]
struct SseToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<SseFunction>,
}

#[derive(Deserialize)]
struct SseFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parses the `data` of one SSE event. Chunks without choices (keepalives,
/// usage reports) yield `None`.
///
/// Only the first tool call of each delta is read, so arguments of parallel
/// calls end up concatenated; [`crate::parse_tool_arguments`] recovers the
/// first object.
pub fn parse_chunk(data: &str) -> Result<Option<CompletionChunk>, AgentError> {
    let chunk: SseChunk = serde_json::from_str(data)
        .map_err(|e| AgentError::Stream(format!("SSE parsing error: {e}, data: {data}")))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AgentError::Stream(message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    let delta = choice.delta;
    let content = delta.as_ref().and_then(|d| d.content.clone());
    let tool_call = delta
        .and_then(|d| d.tool_calls)
        .and_then(|calls| calls.into_iter().next())
        .map(|call| {
            let function = call.function;
            ToolCallDelta {
                id: call.id,
                name: function.as_ref().and_then(|f| f.name.clone()),
                arguments: function.and_then(|f| f.arguments),
            }
        });

    Ok(Some(CompletionChunk {
        content,
        tool_call,
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
    }))
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCompletion {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, AgentError> {
        let body = request_body(&self.config.model, &request)?;
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Completion(format!("{status}: {detail}")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_sse_stream(response, tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

async fn handle_sse_stream(
    response: reqwest::Response,
    tx: mpsc::UnboundedSender<Result<CompletionChunk, AgentError>>,
) {
    let mut events = response.bytes_stream().eventsource();
    loop {
        let event = match timeout(IDLE_TIMEOUT, events.next()).await {
            Ok(Some(Ok(event))) => event,
            Ok(None) => {
                let _ = tx.send(Err(AgentError::Stream(
                    "SSE stream closed before [DONE]".to_string(),
                )));
                return;
            }
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(AgentError::Stream(format!("SSE stream error: {e}"))));
                return;
            }
            Err(_) => {
                let _ = tx.send(Err(AgentError::Stream(format!(
                    "SSE stream idle for {}s",
                    IDLE_TIMEOUT.as_secs()
                ))));
                return;
            }
        };

        tracing::trace!(data = %event.data, "completion SSE event");
        if event.data == "[DONE]" {
            return;
        }
        match parse_chunk(&event.data) {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}
