//! Shared types for the Parley call pipeline.
//!
//! This crate holds the data model every other Parley crate agrees on: the
//! persisted session record, the session lifecycle status, audio and
//! transcript fragments, and the media-stream transport frames exchanged with
//! the telephony provider.
//!
//! Nothing in here performs I/O. Crates depend on `parley-types` for
//! cross-cutting definitions so the dependency graph stays acyclic.

pub mod media;
pub mod transport;

pub use media::{AudioFragment, TranscriptEvent, TranscriptFragment};
pub use transport::{InboundFrame, MarkPayload, MediaPayload, OutboundFrame, StartPayload};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lifetime of a persisted session record in TTL-capable backends.
pub const SESSION_TTL_SECS: u64 = 3600;

/// Lifecycle status of a call session as seen by the persistence layer.
///
/// Statuses only ever move forward: `started` → `active` → `ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The media stream has started; no caller turn has completed yet.
    Started,
    /// At least one caller turn has completed.
    Active,
    /// The media stream has stopped. Terminal.
    Ended,
}

impl SessionStatus {
    /// Returns the lowercase label used on the wire and in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Active => 1,
            Self::Ended => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    ///
    /// `active → active` is allowed (every completed turn re-persists it);
    /// every other self-transition and every backward move is rejected.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        match (self, next) {
            (Self::Active, Self::Active) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted call-metadata record.
///
/// Field names on the wire follow the telephony provider's naming
/// (`callSid`, `streamSid`) so existing records stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(rename = "callSid")]
    pub call_id: Option<String>,
    #[serde(rename = "streamSid")]
    pub stream_id: Option<String>,
    pub status: SessionStatus,
    pub interaction_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Builds a record stamped with the current time.
    pub fn now(
        call_id: Option<String>,
        stream_id: Option<String>,
        status: SessionStatus,
        interaction_count: u64,
    ) -> Self {
        Self {
            call_id,
            stream_id,
            status,
            interaction_count,
            updated_at: Utc::now(),
        }
    }

    /// The storage key for this record: the call id, or the stream id when
    /// the call id is absent. `None` means the record cannot be addressed.
    pub fn record_id(&self) -> Option<&str> {
        self.call_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.stream_id.as_deref().filter(|id| !id.is_empty()))
    }
}
