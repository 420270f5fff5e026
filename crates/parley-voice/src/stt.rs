//! Streaming speech-to-text.
//!
//! A [`TranscriptionFeed`] is a pair of channels: raw audio goes in, ordered
//! [`TranscriptEvent`]s come out. Dropping the audio sender ends the vendor
//! stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_types::{TranscriptEvent, TranscriptFragment};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::DeepgramConfig;
use crate::error::VoiceError;

/// Audio chunks buffered towards the vendor before senders wait.
const AUDIO_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// The vendor closes idle streams after ten seconds without audio.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

pub struct TranscriptionFeed {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Opens a new live stream for one call.
    async fn open(&self) -> Result<TranscriptionFeed, VoiceError>;
}

/// Live transcription over the Deepgram streaming API, tuned for 8 kHz
/// mu-law telephony audio.
#[derive(Debug, Clone)]
pub struct DeepgramTranscription {
    config: DeepgramConfig,
}

impl DeepgramTranscription {
    pub fn new(config: DeepgramConfig) -> Self {
        Self { config }
    }

    pub fn stream_url(&self) -> Result<Url, VoiceError> {
        let mut url = Url::parse(&self.config.listen_url)
            .map_err(|e| VoiceError::Config(format!("invalid listen URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("encoding", "mulaw")
            .append_pair("sample_rate", "8000")
            .append_pair("model", "nova-2")
            .append_pair("punctuate", "true")
            .append_pair("interim_results", "true")
            .append_pair("endpointing", "200")
            .append_pair("utterance_end_ms", "1000");
        Ok(url)
    }
}

#[async_trait]
impl TranscriptionService for DeepgramTranscription {
    async fn open(&self) -> Result<TranscriptionFeed, VoiceError> {
        let url = self.stream_url()?;
        let mut request = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!("transcription stream connected");
        let (mut sink, mut stream) = socket.split();

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.tick().await;
            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        if let Err(e) = sink.send(Message::Binary(chunk.into())).await {
                            tracing::warn!(error = %e, "failed to forward audio to transcription");
                            return;
                        }
                    }
                    _ = keepalive.tick() => {
                        let ping = Message::Text(r#"{"type":"KeepAlive"}"#.into());
                        if sink.send(ping).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = sink
                .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                .await;
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription stream failed");
                        break;
                    }
                };
                let Some(event) = parse_message(&text) else {
                    continue;
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!("transcription stream closed");
        });

        Ok(TranscriptionFeed {
            audio: audio_tx,
            events: event_rx,
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum VendorMessage {
    Results {
        #[serde(default)]
        channel: Channel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Maps one vendor message to a transcript event. Metadata and unparseable
/// messages yield `None`.
pub fn parse_message(raw: &str) -> Option<TranscriptEvent> {
    let message = match serde_json::from_str::<VendorMessage>(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable transcription message");
            return None;
        }
    };
    match message {
        VendorMessage::Results {
            channel,
            is_final,
            speech_final,
        } => {
            let text = channel
                .alternatives
                .into_iter()
                .next()
                .map(|a| a.transcript)
                .unwrap_or_default();
            let fragment = if is_final {
                TranscriptFragment::final_text(text, speech_final)
            } else {
                TranscriptFragment::interim(text)
            };
            Some(TranscriptEvent::Fragment(fragment))
        }
        VendorMessage::UtteranceEnd => Some(TranscriptEvent::UtteranceEnd),
        VendorMessage::Other => None,
    }
}
