//! Per-call orchestration.
//!
//! Each media-stream connection gets one [`CallSession`] running on its own
//! task. The session owns all mutable call state and reacts to three kinds of
//! input: transport frames, transcription events, and events from the
//! pipeline stages it started (turn replies, finished turns, finished
//! synthesis). Conversational turns run on a dedicated worker task that owns
//! the [`ConversationContext`] and takes one turn at a time, so a new
//! utterance never interleaves with a tool loop still in flight.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use parley_agent::{
    AgentConfig, AgentError, CompletionService, ConversationContext, ReplySink, SpokenReply,
    ToolCallLoop, ToolRegistry, TurnInput, TurnOutcome,
};
use parley_store::{persist_session, SessionStore};
use parley_types::{
    AudioFragment, InboundFrame, OutboundFrame, SessionState, SessionStatus, StartPayload,
    TranscriptEvent,
};
use parley_voice::{
    AssemblerOutput, AudioDeliveryQueue, Delivery, RecordingHook, SpeechSynthesizer,
    TranscriptionFeed, TranscriptionService, UtteranceAssembler, VoiceError,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::SessionError;

/// Collaborators shared by every call, built once at startup.
pub struct CallServices {
    pub store: Arc<dyn SessionStore>,
    pub store_ttl_secs: u64,
    pub transcription: Arc<dyn TranscriptionService>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub completion: Arc<dyn CompletionService>,
    pub recording: Arc<dyn RecordingHook>,
    pub tools: Arc<ToolRegistry>,
    pub agent: AgentConfig,
}

impl std::fmt::Debug for CallServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallServices")
            .field("store", &self.store.backend())
            .field("store_ttl_secs", &self.store_ttl_secs)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Output of the turn worker.
#[derive(Debug)]
enum PipelineEvent {
    Reply(SpokenReply),
    TurnFinished(Result<TurnOutcome, AgentError>),
}

struct TurnRequest {
    text: String,
    interaction_count: u64,
}

struct Synthesized {
    index: Option<u64>,
    audio: Result<Option<Vec<u8>>, VoiceError>,
}

struct EventSink(mpsc::UnboundedSender<PipelineEvent>);

impl ReplySink for EventSink {
    fn speak(&mut self, reply: SpokenReply) {
        if self.0.send(PipelineEvent::Reply(reply)).is_err() {
            tracing::debug!("call session gone, dropping reply");
        }
    }
}

pub struct CallSession {
    services: Arc<CallServices>,
    outbound: mpsc::Sender<String>,

    /// `None` until the stream starts.
    status: Option<SessionStatus>,
    call_sid: Option<String>,
    stream_sid: Option<String>,
    interaction_count: u64,
    pending_marks: HashSet<String>,
    highest_reply_index: Option<u64>,

    queue: AudioDeliveryQueue,
    assembler: UtteranceAssembler,
    audio_in: Option<mpsc::Sender<Vec<u8>>>,
    transcripts: Option<mpsc::Receiver<TranscriptEvent>>,
    /// Caller turns queue here behind the one in flight.
    turns: Option<mpsc::UnboundedSender<TurnRequest>>,
    worker: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    synthesis: JoinSet<Synthesized>,
}

impl CallSession {
    /// Creates a session that writes serialized transport frames to
    /// `outbound`.
    pub fn new(services: Arc<CallServices>, outbound: mpsc::Sender<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            services,
            outbound,
            status: None,
            call_sid: None,
            stream_sid: None,
            interaction_count: 0,
            pending_marks: HashSet::new(),
            highest_reply_index: None,
            queue: AudioDeliveryQueue::new(),
            assembler: UtteranceAssembler::new(),
            audio_in: None,
            transcripts: None,
            turns: None,
            worker: None,
            events_tx,
            events_rx,
            synthesis: JoinSet::new(),
        }
    }

    /// Processes inbound transport frames until the transport closes.
    ///
    /// Returning drops every pending synthesis and the turn worker without
    /// waiting for them.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        loop {
            let result = tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(raw) => self.on_frame(&raw).await,
                    None => break,
                },
                event = next_transcript(&mut self.transcripts), if self.transcripts.is_some() => {
                    match event {
                        Some(event) => self.on_transcript(event).await,
                        None => {
                            tracing::debug!(call_sid = self.call_sid(), "transcription feed ended");
                            self.transcripts = None;
                            Ok(())
                        }
                    }
                }
                Some(event) = self.events_rx.recv() => self.on_pipeline_event(event).await,
                Some(done) = self.synthesis.join_next(), if !self.synthesis.is_empty() => {
                    match done {
                        Ok(synthesized) => self.on_synthesized(synthesized).await,
                        Err(e) => {
                            tracing::error!(call_sid = self.call_sid(), error = %e, "synthesis task failed");
                            Ok(())
                        }
                    }
                }
            };

            match result {
                Ok(()) => {}
                Err(SessionError::TransportClosed) => break,
                Err(e) => tracing::warn!(
                    call_sid = self.call_sid(),
                    stream_sid = self.stream_sid(),
                    error = %e,
                    "failed to handle call event"
                ),
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        tracing::info!(
            call_sid = self.call_sid(),
            stream_sid = self.stream_sid(),
            interaction_count = self.interaction_count,
            "call connection closed"
        );
    }

    fn call_sid(&self) -> &str {
        self.call_sid.as_deref().unwrap_or("")
    }

    fn stream_sid(&self) -> &str {
        self.stream_sid.as_deref().unwrap_or("")
    }

    fn ended(&self) -> bool {
        self.status == Some(SessionStatus::Ended)
    }

    async fn on_frame(&mut self, raw: &str) -> Result<(), SessionError> {
        if self.ended() {
            tracing::warn!(call_sid = self.call_sid(), "dropping frame received after stop");
            return Ok(());
        }

        let frame: InboundFrame = serde_json::from_str(raw)?;
        let kind = frame.kind();
        match frame {
            InboundFrame::Start { start } => self.on_start(start).await,
            InboundFrame::Media { media } => self.on_media(&media.payload),
            InboundFrame::Mark { mark } => {
                self.pending_marks.remove(&mark.name);
                Ok(())
            }
            InboundFrame::Stop => self.on_stop().await,
            InboundFrame::Connected | InboundFrame::Unknown => {
                tracing::debug!(event = kind, "ignoring transport event");
                Ok(())
            }
        }
    }

    async fn on_start(&mut self, start: StartPayload) -> Result<(), SessionError> {
        if self.status.is_some() {
            tracing::warn!(call_sid = self.call_sid(), "ignoring repeated start frame");
            return Ok(());
        }

        self.queue.bind_stream(&start.stream_sid);
        self.call_sid = start.call_sid;
        self.stream_sid = Some(start.stream_sid);
        self.status = Some(SessionStatus::Started);
        tracing::info!(
            call_sid = self.call_sid(),
            stream_sid = self.stream_sid(),
            "media stream started"
        );

        self.spawn_turn_worker();
        match self.services.transcription.open().await {
            Ok(TranscriptionFeed { audio, events }) => {
                self.audio_in = Some(audio);
                self.transcripts = Some(events);
            }
            Err(e) => tracing::error!(
                call_sid = self.call_sid(),
                error = %e,
                "failed to open transcription stream"
            ),
        }

        self.persist(SessionStatus::Started).await;

        let greeting = self.services.agent.greeting.clone();
        self.speak(None, greeting);

        let Some(call_sid) = self.call_sid.clone() else {
            tracing::warn!(stream_sid = self.stream_sid(), "start frame has no call sid, not recording");
            return Ok(());
        };
        let recording = Arc::clone(&self.services.recording);
        tokio::spawn(async move {
            if let Err(e) = recording.start_recording(&call_sid).await {
                tracing::error!(call_sid = %call_sid, error = %e, "recording setup failed");
            }
        });
        Ok(())
    }

    fn on_media(&mut self, payload: &str) -> Result<(), SessionError> {
        let Some(audio_in) = &self.audio_in else {
            tracing::debug!("no transcription stream, dropping caller audio");
            return Ok(());
        };
        let audio = base64::engine::general_purpose::STANDARD.decode(payload)?;
        match audio_in.try_send(audio) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(call_sid = self.call_sid(), "transcription backlog full, dropping audio");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.audio_in = None;
                Err(SessionError::StageClosed("transcription"))
            }
        }
    }

    async fn on_stop(&mut self) -> Result<(), SessionError> {
        if let Some(current) = self.status {
            if !current.can_transition_to(SessionStatus::Ended) {
                return Ok(());
            }
        }
        self.status = Some(SessionStatus::Ended);
        tracing::info!(
            call_sid = self.call_sid(),
            stream_sid = self.stream_sid(),
            interaction_count = self.interaction_count,
            "media stream stopped"
        );

        self.audio_in = None;
        self.transcripts = None;
        self.turns = None;
        self.persist(SessionStatus::Ended).await;
        Ok(())
    }

    async fn on_transcript(&mut self, event: TranscriptEvent) -> Result<(), SessionError> {
        if self.ended() {
            return Ok(());
        }
        match self.assembler.handle(event, !self.pending_marks.is_empty()) {
            Some(AssemblerOutput::Utterance(text)) => self.dispatch_turn(text),
            Some(AssemblerOutput::Interruption) => self.interrupt().await,
            None => Ok(()),
        }
    }

    fn dispatch_turn(&mut self, text: String) -> Result<(), SessionError> {
        let Some(turns) = &self.turns else {
            return Err(SessionError::StageClosed("turn"));
        };
        tracing::info!(call_sid = self.call_sid(), utterance = %text, "caller turn finished");
        let request = TurnRequest {
            text,
            interaction_count: self.interaction_count,
        };
        turns
            .send(request)
            .map_err(|_| SessionError::StageClosed("turn"))
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        let dropped = self.queue.interrupt(self.highest_reply_index);
        tracing::info!(
            call_sid = self.call_sid(),
            dropped,
            "caller interrupted, clearing audio"
        );
        let clear = OutboundFrame::clear(self.stream_sid());
        self.send(&clear).await
    }

    async fn on_pipeline_event(&mut self, event: PipelineEvent) -> Result<(), SessionError> {
        if self.ended() {
            tracing::debug!(call_sid = self.call_sid(), "dropping pipeline output after stop");
            return Ok(());
        }
        match event {
            PipelineEvent::Reply(reply) => {
                tracing::debug!(
                    call_sid = self.call_sid(),
                    index = ?reply.index,
                    interaction_count = reply.interaction_count,
                    "assistant reply ready"
                );
                if let Some(index) = reply.index {
                    self.highest_reply_index = self.highest_reply_index.max(Some(index));
                }
                self.speak(reply.index, reply.text);
            }
            PipelineEvent::TurnFinished(Ok(outcome)) => {
                self.interaction_count += 1;
                self.status = Some(SessionStatus::Active);
                tracing::info!(
                    call_sid = self.call_sid(),
                    interaction_count = self.interaction_count,
                    replies = outcome.replies,
                    tool_rounds = outcome.tool_rounds,
                    "assistant turn complete"
                );
                self.persist(SessionStatus::Active).await;
            }
            PipelineEvent::TurnFinished(Err(e)) => {
                tracing::error!(
                    call_sid = self.call_sid(),
                    stream_sid = self.stream_sid(),
                    interaction_count = self.interaction_count,
                    error = %e,
                    "assistant turn failed"
                );
                let apology = self.services.agent.failure_reply.clone();
                self.speak(None, apology);
            }
        }
        Ok(())
    }

    async fn on_synthesized(&mut self, done: Synthesized) -> Result<(), SessionError> {
        if self.ended() {
            return Ok(());
        }
        let deliveries = match (done.index, done.audio) {
            (Some(index), Ok(Some(audio))) => {
                self.queue.enqueue(AudioFragment::ordered(index, audio))
            }
            (None, Ok(Some(audio))) => self.queue.enqueue(AudioFragment::immediate(audio)),
            (index, Ok(None)) => {
                tracing::warn!(call_sid = self.call_sid(), ?index, "speech synthesis returned no audio");
                index.map(|i| self.queue.skip(i)).unwrap_or_default()
            }
            (index, Err(e)) => {
                tracing::error!(
                    call_sid = self.call_sid(),
                    ?index,
                    error = %e,
                    "speech synthesis failed"
                );
                index.map(|i| self.queue.skip(i)).unwrap_or_default()
            }
        };
        self.deliver(deliveries).await
    }

    async fn deliver(&mut self, deliveries: Vec<Delivery>) -> Result<(), SessionError> {
        for delivery in deliveries {
            self.pending_marks.insert(delivery.token.clone());
            for frame in delivery.into_frames() {
                self.send(&frame).await?;
            }
        }
        Ok(())
    }

    async fn send(&self, frame: &OutboundFrame) -> Result<(), SessionError> {
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    fn speak(&mut self, index: Option<u64>, text: String) {
        let speech = Arc::clone(&self.services.speech);
        self.synthesis.spawn(async move {
            let audio = speech.synthesize(&text).await;
            Synthesized { index, audio }
        });
    }

    async fn persist(&self, status: SessionStatus) {
        let state = SessionState::now(
            self.call_sid.clone(),
            self.stream_sid.clone(),
            status,
            self.interaction_count,
        );
        persist_session(
            self.services.store.as_ref(),
            &state,
            self.services.store_ttl_secs,
        )
        .await;
    }

    fn spawn_turn_worker(&mut self) {
        let agent = &self.services.agent;
        let mut context = ConversationContext::new(&agent.system_prompt, &agent.greeting);
        if let Some(call_sid) = &self.call_sid {
            context.bind_call(call_sid);
        }
        let tool_loop = ToolCallLoop::new(
            Arc::clone(&self.services.completion),
            Arc::clone(&self.services.tools),
            agent.max_tool_rounds,
        );

        let (turns_tx, turns_rx) = mpsc::unbounded_channel();
        let events = EventSink(self.events_tx.clone());
        self.turns = Some(turns_tx);
        self.worker = Some(tokio::spawn(run_turns(context, tool_loop, turns_rx, events)));
    }
}

/// Takes caller turns one at a time for the life of the call.
async fn run_turns(
    mut context: ConversationContext,
    mut tool_loop: ToolCallLoop,
    mut turns: mpsc::UnboundedReceiver<TurnRequest>,
    mut sink: EventSink,
) {
    while let Some(turn) = turns.recv().await {
        let result = tool_loop
            .run(
                &mut context,
                TurnInput::user(turn.text),
                turn.interaction_count,
                &mut sink,
            )
            .await;
        if sink.0.send(PipelineEvent::TurnFinished(result)).is_err() {
            break;
        }
    }
}

async fn next_transcript(
    feed: &mut Option<mpsc::Receiver<TranscriptEvent>>,
) -> Option<TranscriptEvent> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
