use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_VOICE_MODEL: &str = "aura-asteria-en";
pub const DEEPGRAM_API_URL: &str = "https://api.deepgram.com";
pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
pub const TWILIO_API_URL: &str = "https://api.twilio.com";

fn default_voice_model() -> String {
    DEFAULT_VOICE_MODEL.to_string()
}

fn default_api_url() -> String {
    DEEPGRAM_API_URL.to_string()
}

fn default_listen_url() -> String {
    DEEPGRAM_LISTEN_URL.to_string()
}

fn default_twilio_url() -> String {
    TWILIO_API_URL.to_string()
}

/// Credentials and endpoints for the speech vendor (transcription and
/// synthesis).
#[derive(Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Synthesis voice, e.g. `aura-asteria-en`.
    #[serde(default = "default_voice_model")]
    pub voice_model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_listen_url")]
    pub listen_url: String,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_model: default_voice_model(),
            api_url: default_api_url(),
            listen_url: default_listen_url(),
        }
    }
}

impl fmt::Debug for DeepgramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepgramConfig")
            .field("api_key", &"[REDACTED]")
            .field("voice_model", &self.voice_model)
            .field("api_url", &self.api_url)
            .field("listen_url", &self.listen_url)
            .finish()
    }
}

impl DeepgramConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

/// Telephony account used for call recording.
#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default, skip_serializing)]
    pub auth_token: String,
    #[serde(default)]
    pub recording_enabled: bool,
    #[serde(default = "default_twilio_url")]
    pub api_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            recording_enabled: false,
            api_url: default_twilio_url(),
        }
    }
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("recording_enabled", &self.recording_enabled)
            .field("api_url", &self.api_url)
            .finish()
    }
}
