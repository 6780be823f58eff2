//! Speech capabilities: recognition (speech to text) and synthesis (text to
//! speech), each behind a trait so environments without an engine get a
//! no-op implementation.

pub mod bridge;
pub mod recognizer;
pub mod synthesizer;
#[cfg(test)]
pub mod testing;
pub mod types;

pub use bridge::{SpeechProgress, VoiceBridge};
pub use recognizer::{CommandRecognizer, NoopRecognizer, SpeechRecognizer};
pub use synthesizer::{CommandSynthesizer, NoopSynthesizer, SpeechSynthesizer};
pub use types::{
    Capability, RecognitionConfig, RecognitionErrorKind, RecognitionEvent, SynthesisEvent,
    Utterance, VoiceError, VoiceEvent, VoiceInfo,
};
