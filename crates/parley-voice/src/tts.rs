use std::time::Duration;

use async_trait::async_trait;

use crate::config::DeepgramConfig;
use crate::error::VoiceError;

/// Maximum text input size for TTS (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for one synthesis request.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Renders `text` to telephony audio. `Ok(None)` means there is nothing
    /// to play: blank text or a non-success response.
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>, VoiceError>;
}

/// Speech synthesis through the Deepgram `speak` endpoint, returning raw
/// 8 kHz mu-law without a container.
#[derive(Debug, Clone)]
pub struct DeepgramSpeech {
    client: reqwest::Client,
    config: DeepgramConfig,
}

impl DeepgramSpeech {
    pub fn new(client: reqwest::Client, config: DeepgramConfig) -> Self {
        Self { client, config }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1/speak?model={}&encoding=mulaw&sample_rate=8000&container=none",
            self.config.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.voice_model)
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramSpeech {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>, VoiceError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Token {}", self.config.api_key))
            .timeout(TTS_TIMEOUT)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "speech synthesis returned no audio");
            return Ok(None);
        }

        let audio = response.bytes().await?;
        Ok((!audio.is_empty()).then(|| audio.to_vec()))
    }
}
