use std::fmt;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Recognition,
    Synthesis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Recognition => write!(f, "Speech recognition"),
            Capability::Synthesis => write!(f, "Speech synthesis"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("{0} is not supported in this environment")]
    Unavailable(Capability),

    #[error("Failed to start {capability}: {reason}")]
    StartFailed {
        capability: Capability,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    NoSpeech,
    AudioCapture,
    NotAllowed,
    Network,
    Other(String),
}

impl RecognitionErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => RecognitionErrorKind::NoSpeech,
            "audio-capture" => RecognitionErrorKind::AudioCapture,
            "not-allowed" => RecognitionErrorKind::NotAllowed,
            "network" => RecognitionErrorKind::Network,
            other => RecognitionErrorKind::Other(other.to_string()),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            RecognitionErrorKind::NoSpeech => "No speech detected",
            RecognitionErrorKind::AudioCapture => "No microphone found",
            RecognitionErrorKind::NotAllowed => "Microphone permission denied",
            RecognitionErrorKind::Network => "Network error occurred",
            RecognitionErrorKind::Other(_) => "Speech recognition error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    /// Provisional transcript that may still change.
    Interim(String),
    Final(String),
    Error(RecognitionErrorKind),
    /// The session is over, whatever the reason.
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Started(Uuid),
    Finished(Uuid),
    Failed(Uuid, String),
}

/// Everything the speech engines report back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// `session` is the id the listening session was started with.
    Recognition {
        session: Uuid,
        event: RecognitionEvent,
    },
    Synthesis(SynthesisEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Echoed on every event of this session.
    pub session: Uuid,
    pub continuous: bool,
    pub interim_results: bool,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: Uuid,
    pub text: String,
    pub voice: Option<VoiceInfo>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}
