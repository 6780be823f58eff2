use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::recognizer::{NoopRecognizer, SpeechRecognizer};
use super::synthesizer::{select_voice, NoopSynthesizer, SpeechSynthesizer};
use super::types::{
    Capability, RecognitionConfig, RecognitionEvent, SynthesisEvent, Utterance, VoiceError,
    VoiceEvent,
};
use crate::services::markdown;
use crate::services::settings::{ListeningMode, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakState {
    Idle,
    Speaking,
}

/// What a synthesis event meant for the current utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechProgress {
    Started,
    Finished,
    Failed(String),
}

/// Owns the speech engines and tracks whether we are listening or speaking.
///
/// Engine events arrive on the channel handed out at construction and must be
/// fed back through [`VoiceBridge::on_recognition`] and
/// [`VoiceBridge::on_synthesis`].
pub struct VoiceBridge {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: mpsc::Sender<VoiceEvent>,
    listen_state: ListenState,
    current_session: Option<Uuid>,
    speak_state: SpeakState,
    current_utterance: Option<Uuid>,
}

impl VoiceBridge {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        events: mpsc::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            events,
            listen_state: ListenState::Idle,
            current_session: None,
            speak_state: SpeakState::Idle,
            current_utterance: None,
        }
    }

    /// A bridge with neither capability.
    pub fn disabled(events: mpsc::Sender<VoiceEvent>) -> Self {
        Self::new(Arc::new(NoopRecognizer), Arc::new(NoopSynthesizer), events)
    }

    pub fn can_listen(&self) -> bool {
        self.recognizer.is_available()
    }

    pub fn can_speak(&self) -> bool {
        self.synthesizer.is_available()
    }

    pub fn is_listening(&self) -> bool {
        self.listen_state == ListenState::Listening
    }

    pub fn is_speaking(&self) -> bool {
        self.speak_state == SpeakState::Speaking
    }

    /// Start a recognition session configured from `settings`. Returns
    /// `false` when a session is already running.
    pub async fn start_listening(&mut self, settings: &Settings) -> Result<bool, VoiceError> {
        if !self.can_listen() {
            return Err(VoiceError::Unavailable(Capability::Recognition));
        }
        if self.is_listening() {
            return Ok(false);
        }

        let session = Uuid::new_v4();
        let config = RecognitionConfig {
            session,
            continuous: settings.listening_mode == ListeningMode::Continuous,
            interim_results: true,
            locale: settings.voice_locale.clone(),
        };
        self.recognizer.start(config, self.events.clone()).await?;

        tracing::debug!("Listening session {} started", session);
        self.listen_state = ListenState::Listening;
        self.current_session = Some(session);
        Ok(true)
    }

    /// Explicit stop. Whatever the stopped session still reports is stale.
    pub async fn stop_listening(&mut self) -> bool {
        if !self.is_listening() {
            return false;
        }
        self.current_session = None;
        self.recognizer.stop().await;
        self.listen_state = ListenState::Idle;
        tracing::debug!("Listening stopped");
        true
    }

    /// Track a recognition event from listening session `session`. Events
    /// from any session but the current one are stale and yield `None`;
    /// otherwise the result is `true` when the session ended by itself.
    pub fn on_recognition(&mut self, session: Uuid, event: &RecognitionEvent) -> Option<bool> {
        if self.current_session != Some(session) {
            tracing::debug!("Ignoring {:?} from stale listening session {}", event, session);
            return None;
        }
        let ended = match event {
            RecognitionEvent::Started => {
                self.listen_state = ListenState::Listening;
                false
            }
            RecognitionEvent::Error(_) => {
                self.listen_state = ListenState::Idle;
                false
            }
            RecognitionEvent::Ended => {
                self.listen_state = ListenState::Idle;
                self.current_session = None;
                true
            }
            RecognitionEvent::Interim(_) | RecognitionEvent::Final(_) => false,
        };
        Some(ended)
    }

    /// Speak `text` after reducing its markdown to plain sentences. Anything
    /// already being spoken is cancelled first. Returns the utterance id, or
    /// `None` when nothing is left to say.
    pub async fn speak(
        &mut self,
        text: &str,
        settings: &Settings,
    ) -> Result<Option<Uuid>, VoiceError> {
        if !self.can_speak() {
            return Err(VoiceError::Unavailable(Capability::Synthesis));
        }
        self.stop_speaking().await;

        let text = markdown::speech_text(text);
        if text.is_empty() {
            return Ok(None);
        }

        let voices = self.synthesizer.voices().await;
        let voice = select_voice(&voices, &settings.voice_locale, &settings.voice_name_hints);
        let utterance = Utterance {
            id: Uuid::new_v4(),
            text,
            voice,
            rate: settings.voice_rate,
            pitch: settings.voice_pitch,
            volume: 1.0,
        };
        let id = utterance.id;

        self.synthesizer.speak(utterance, self.events.clone()).await?;
        self.current_utterance = Some(id);
        Ok(Some(id))
    }

    pub async fn stop_speaking(&mut self) -> bool {
        if self.current_utterance.is_none() && !self.is_speaking() {
            return false;
        }
        self.synthesizer.cancel().await;
        self.current_utterance = None;
        self.speak_state = SpeakState::Idle;
        true
    }

    /// Track a synthesis event. Events for anything but the current utterance
    /// are stale and yield `None`.
    pub fn on_synthesis(&mut self, event: &SynthesisEvent) -> Option<SpeechProgress> {
        let (id, progress) = match event {
            SynthesisEvent::Started(id) => (id, SpeechProgress::Started),
            SynthesisEvent::Finished(id) => (id, SpeechProgress::Finished),
            SynthesisEvent::Failed(id, reason) => (id, SpeechProgress::Failed(reason.clone())),
        };
        if self.current_utterance != Some(*id) {
            return None;
        }

        if progress == SpeechProgress::Started {
            self.speak_state = SpeakState::Speaking;
        } else {
            self.speak_state = SpeakState::Idle;
            self.current_utterance = None;
        }
        Some(progress)
    }
}
