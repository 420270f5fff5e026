//! Media-stream transport frames.
//!
//! Inbound frames are JSON objects tagged by `event`. Only the fields the call
//! pipeline depends on are modelled; everything else the provider sends is
//! ignored during deserialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_sid: String,
    /// Absent on some streams; the stream id then identifies the call.
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames received from the telephony provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected,
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop,
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
            Self::Stop => "stop",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames sent back to the telephony provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundFrame {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}
