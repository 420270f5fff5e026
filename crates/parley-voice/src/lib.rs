//! Voice pipeline pieces for Parley calls.
//!
//! Caller audio is transcribed by a streaming [`TranscriptionService`] and
//! assembled into whole turns by the [`UtteranceAssembler`]. Assistant replies
//! are rendered by a [`SpeechSynthesizer`] and handed to the transport in
//! order by the [`AudioDeliveryQueue`]. Recording setup sits behind
//! [`RecordingHook`].

pub mod assembler;
pub mod config;
pub mod delivery;
pub mod error;
pub mod recording;
pub mod stt;
pub mod tts;

pub use assembler::{AssemblerOutput, UtteranceAssembler, INTERRUPTION_MIN_CHARS};
pub use config::{DeepgramConfig, TwilioConfig, DEFAULT_VOICE_MODEL};
pub use delivery::{AudioDeliveryQueue, Delivery};
pub use error::VoiceError;
pub use recording::{recording_hook, NoRecording, RecordingHook, TwilioRecording};
pub use stt::{DeepgramTranscription, TranscriptionFeed, TranscriptionService};
pub use tts::{DeepgramSpeech, SpeechSynthesizer};
