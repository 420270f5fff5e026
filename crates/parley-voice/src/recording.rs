//! Call-recording setup, run once per call at stream start.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TwilioConfig;
use crate::error::VoiceError;

#[async_trait]
pub trait RecordingHook: Send + Sync {
    async fn start_recording(&self, call_sid: &str) -> Result<(), VoiceError>;
}

/// Used when recording is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecording;

#[async_trait]
impl RecordingHook for NoRecording {
    async fn start_recording(&self, _call_sid: &str) -> Result<(), VoiceError> {
        Ok(())
    }
}

/// Starts a recording of the live call through the telephony REST API.
#[derive(Debug, Clone)]
pub struct TwilioRecording {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioRecording {
    pub fn new(client: reqwest::Client, config: TwilioConfig) -> Self {
        Self { client, config }
    }

    pub fn endpoint(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}/Recordings.json",
            self.config.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.account_sid),
            urlencoding::encode(call_sid)
        )
    }
}

#[async_trait]
impl RecordingHook for TwilioRecording {
    async fn start_recording(&self, call_sid: &str) -> Result<(), VoiceError> {
        let response = self
            .client
            .post(self.endpoint(call_sid))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("RecordingChannels", "dual")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Recording(format!("{status}: {body}")));
        }
        tracing::info!(call_sid, "call recording started");
        Ok(())
    }
}

/// Picks the recording hook for `config`.
pub fn recording_hook(client: reqwest::Client, config: &TwilioConfig) -> Arc<dyn RecordingHook> {
    if config.recording_enabled {
        Arc::new(TwilioRecording::new(client, config.clone()))
    } else {
        Arc::new(NoRecording)
    }
}
