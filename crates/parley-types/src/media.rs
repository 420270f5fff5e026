//! Audio and transcript fragments flowing through a call pipeline.

/// A piece of synthesized audio waiting to be delivered to the caller.
///
/// `sequence_index == None` marks an out-of-band fragment (the greeting, a
/// tool acknowledgement) that is delivered immediately. Indexed fragments are
/// delivered strictly in ascending index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFragment {
    pub sequence_index: Option<u64>,
    pub payload: Vec<u8>,
}

impl AudioFragment {
    pub fn ordered(index: u64, payload: Vec<u8>) -> Self {
        Self {
            sequence_index: Some(index),
            payload,
        }
    }

    pub fn immediate(payload: Vec<u8>) -> Self {
        Self {
            sequence_index: None,
            payload,
        }
    }
}

/// One result from the streaming transcription feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    /// The vendor will not revise this text any further.
    pub is_final: bool,
    /// The vendor detected the end of the caller's speech for this turn.
    pub is_end_of_turn: bool,
}

impl TranscriptFragment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            is_end_of_turn: false,
        }
    }

    pub fn final_text(text: impl Into<String>, is_end_of_turn: bool) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            is_end_of_turn,
        }
    }
}

/// Events emitted by a transcription feed, in feed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Fragment(TranscriptFragment),
    /// Silence-based utterance boundary, distinct from per-fragment finality.
    UtteranceEnd,
}
