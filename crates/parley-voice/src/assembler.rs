//! Turns the streaming transcript into whole caller utterances.

use parley_types::{TranscriptEvent, TranscriptFragment};

/// Interim transcripts at or below this many characters never count as
/// barge-in.
pub const INTERRUPTION_MIN_CHARS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerOutput {
    /// A finished caller turn.
    Utterance(String),
    /// The caller started talking over assistant audio.
    Interruption,
}

#[derive(Debug, Default)]
pub struct UtteranceAssembler {
    accumulated: String,
    turn_closed: bool,
}

impl UtteranceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transcription event. `marks_pending` reports whether
    /// assistant audio is still playing.
    pub fn handle(
        &mut self,
        event: TranscriptEvent,
        marks_pending: bool,
    ) -> Option<AssemblerOutput> {
        match event {
            TranscriptEvent::Fragment(fragment) if fragment.is_final => self.on_final(fragment),
            TranscriptEvent::Fragment(fragment) => {
                let barge_in = marks_pending
                    && fragment.text.trim().chars().count() > INTERRUPTION_MIN_CHARS;
                barge_in.then_some(AssemblerOutput::Interruption)
            }
            TranscriptEvent::UtteranceEnd => {
                let out = if self.turn_closed {
                    None
                } else {
                    self.take_utterance()
                };
                self.accumulated.clear();
                self.turn_closed = false;
                out
            }
        }
    }

    fn on_final(&mut self, fragment: TranscriptFragment) -> Option<AssemblerOutput> {
        let text = fragment.text.trim();
        if !text.is_empty() {
            if !self.accumulated.is_empty() {
                self.accumulated.push(' ');
            }
            self.accumulated.push_str(text);
        }

        if fragment.is_end_of_turn {
            self.turn_closed = true;
            self.take_utterance()
        } else {
            self.turn_closed = false;
            None
        }
    }

    fn take_utterance(&mut self) -> Option<AssemblerOutput> {
        let text = std::mem::take(&mut self.accumulated);
        (!text.is_empty()).then_some(AssemblerOutput::Utterance(text))
    }
}
