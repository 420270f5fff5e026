#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use parley_agent::{
    AgentConfig, AgentError, CompletionChunk, CompletionRequest, CompletionService,
    CompletionStream, FinishReason, ToolCallDelta, ToolDefinition, ToolHandler, ToolRegistry,
};
use parley_server::{CallServices, CallSession};
use parley_store::{MemoryStore, SessionStore};
use parley_types::{SessionState, TranscriptEvent, TranscriptFragment};
use parley_voice::{RecordingHook, SpeechSynthesizer, TranscriptionFeed, TranscriptionService, VoiceError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);
pub const ACK: &str = "Let me check that date.";

/// The test's end of one opened transcription feed.
pub struct FeedHandle {
    pub events: mpsc::Sender<TranscriptEvent>,
    pub audio: mpsc::Receiver<Vec<u8>>,
}

impl FeedHandle {
    pub async fn say(&self, text: &str) {
        self.events
            .send(TranscriptEvent::Fragment(TranscriptFragment::final_text(text, true)))
            .await
            .expect("session should be listening");
    }

    pub async fn interim(&self, text: &str) {
        self.events
            .send(TranscriptEvent::Fragment(TranscriptFragment::interim(text)))
            .await
            .expect("session should be listening");
    }
}

/// Hands every opened feed to the test.
pub struct FakeTranscription {
    opened: mpsc::UnboundedSender<FeedHandle>,
}

#[async_trait]
impl TranscriptionService for FakeTranscription {
    async fn open(&self) -> Result<TranscriptionFeed, VoiceError> {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let _ = self.opened.send(FeedHandle {
            events: events_tx,
            audio: audio_rx,
        });
        Ok(TranscriptionFeed {
            audio: audio_tx,
            events: events_rx,
        })
    }
}

/// "Synthesizes" text as its UTF-8 bytes so tests can read what was spoken.
pub struct EchoSpeech;

#[async_trait]
impl SpeechSynthesizer for EchoSpeech {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>, VoiceError> {
        Ok(Some(text.as_bytes().to_vec()))
    }
}

#[derive(Default)]
pub struct CountingRecording {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl RecordingHook for CountingRecording {
    async fn start_recording(&self, call_sid: &str) -> Result<(), VoiceError> {
        self.calls.lock().unwrap().push(call_sid.to_string());
        Err(VoiceError::Recording("recording is unavailable in tests".to_string()))
    }
}

/// Plays back one scripted chunk list per completion request.
#[derive(Default)]
pub struct Scripted {
    rounds: Mutex<VecDeque<Vec<CompletionChunk>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl Scripted {
    pub fn new(rounds: Vec<Vec<CompletionChunk>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::default(),
        })
    }

    pub fn request_count(&self) -> usize {
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
            .ok_or_else(|| AgentError::Completion("upstream unavailable".to_string()))?;
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

pub struct DateTool;

#[async_trait]
impl ToolHandler for DateTool {
    async fn call(&self, arguments: Value) -> Result<Value, AgentError> {
        Ok(json!({ "status": "success", "date": arguments["date"], "available": true }))
    }
}

pub fn tool_call_round(name: &str, fragments: &[&str]) -> Vec<CompletionChunk> {
    let mut chunks = vec![CompletionChunk::tool_call(ToolCallDelta {
        id: Some("call_1".to_string()),
        name: Some(name.to_string()),
        arguments: Some(String::new()),
    })];
    chunks.extend(fragments.iter().map(|f| {
        CompletionChunk::tool_call(ToolCallDelta {
            arguments: Some(f.to_string()),
            ..ToolCallDelta::default()
        })
    }));
    chunks.push(CompletionChunk::finish(FinishReason::ToolCalls));
    chunks
}

pub fn answer_round(parts: &[&str]) -> Vec<CompletionChunk> {
    let mut chunks: Vec<CompletionChunk> =
        parts.iter().map(|p| CompletionChunk::content(*p)).collect();
    chunks.push(CompletionChunk::finish(FinishReason::Stop));
    chunks
}

pub struct Fakes {
    pub store: Arc<MemoryStore>,
    pub completion: Arc<Scripted>,
    pub recording: Arc<CountingRecording>,
    pub feeds: mpsc::UnboundedReceiver<FeedHandle>,
}

pub fn services(rounds: Vec<Vec<CompletionChunk>>) -> (CallServices, Fakes) {
    let store = Arc::new(MemoryStore::new());
    let completion = Scripted::new(rounds);
    let recording = Arc::new(CountingRecording::default());
    let (opened, feeds) = mpsc::unbounded_channel();

    let mut tools = ToolRegistry::new();
    tools.register(
        ToolDefinition::new("checkDate", "Checks whether a date is open.").with_say(ACK),
        Arc::new(DateTool),
    );

    let services = CallServices {
        store: store.clone(),
        store_ttl_secs: 3600,
        transcription: Arc::new(FakeTranscription { opened }),
        speech: Arc::new(EchoSpeech),
        completion: completion.clone(),
        recording: recording.clone(),
        tools: Arc::new(tools),
        agent: AgentConfig::default(),
    };
    let fakes = Fakes {
        store,
        completion,
        recording,
        feeds,
    };
    (services, fakes)
}

/// A session driven directly through its frame channels.
pub struct Harness {
    pub frames_in: mpsc::Sender<String>,
    pub frames_out: mpsc::Receiver<String>,
    pub fakes: Fakes,
    pub task: JoinHandle<()>,
}

pub fn start_session(rounds: Vec<Vec<CompletionChunk>>) -> Harness {
    let (services, fakes) = services(rounds);
    let (in_tx, in_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::channel(64);
    let session = CallSession::new(Arc::new(services), out_tx);
    let task = tokio::spawn(session.run(in_rx));
    Harness {
        frames_in: in_tx,
        frames_out: out_rx,
        fakes,
        task,
    }
}

impl Harness {
    pub async fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&self, raw: &str) {
        self.frames_in
            .send(raw.to_string())
            .await
            .expect("session should accept frames");
    }

    pub async fn start(&mut self, call_sid: &str, stream_sid: &str) -> FeedHandle {
        self.send(start_frame(call_sid, stream_sid)).await;
        tokio::time::timeout(WAIT, self.fakes.feeds.recv())
            .await
            .expect("transcription feed should open")
            .expect("transcription feed handle")
    }

    pub async fn next_frame(&mut self) -> Value {
        let raw = tokio::time::timeout(WAIT, self.frames_out.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("session closed its outbound channel");
        serde_json::from_str(&raw).expect("outbound frames are JSON")
    }

    /// Reads a media frame and its mark, returning the spoken text and the
    /// mark token.
    pub async fn next_spoken(&mut self) -> (String, String) {
        let media = self.next_frame().await;
        assert_eq!(media["event"], "media", "expected media, got {media}");
        let mark = self.next_frame().await;
        assert_eq!(mark["event"], "mark", "expected mark, got {mark}");
        (
            spoken_text(&media),
            mark["mark"]["name"].as_str().unwrap().to_string(),
        )
    }

    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(raw)) = tokio::time::timeout(window, self.frames_out.recv()).await {
            panic!("unexpected outbound frame: {raw}");
        }
    }
}

pub fn start_frame(call_sid: &str, stream_sid: &str) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": { "streamSid": stream_sid, "callSid": call_sid, "tracks": ["inbound"] },
        "streamSid": stream_sid
    })
}

pub fn spoken_text(media: &Value) -> String {
    let payload = media["media"]["payload"].as_str().expect("media payload");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .expect("payload is base64");
    String::from_utf8(bytes).expect("echoed speech is UTF-8")
}

/// Polls the store until the record for `id` satisfies `check`.
pub async fn wait_for_record<F>(store: &MemoryStore, id: &str, check: F) -> SessionState
where
    F: Fn(&SessionState) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Ok(Some(state)) = store.get_session_value(id).await {
            if check(&state) {
                return state;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("record {id} never reached the expected state");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
