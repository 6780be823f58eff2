//! Scriptable speech engines for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::recognizer::SpeechRecognizer;
use super::synthesizer::SpeechSynthesizer;
use super::types::{Capability, RecognitionConfig, Utterance, VoiceError, VoiceEvent, VoiceInfo};

/// Records sessions; events are fed to the session by the test itself.
#[derive(Default)]
pub struct FakeRecognizer {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub configs: Mutex<Vec<RecognitionConfig>>,
    fail_start: AtomicBool,
}

impl FakeRecognizer {
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make every later `start` fail.
    pub fn fail_starts(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Id of the most recently started session.
    pub fn last_session(&self) -> Option<Uuid> {
        self.configs.lock().unwrap().last().map(|c| c.session)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start(
        &self,
        config: RecognitionConfig,
        _tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(VoiceError::StartFailed {
                capability: Capability::Recognition,
                reason: "busy".to_string(),
            });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().push(config);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    pub voices: Vec<VoiceInfo>,
    pub spoken: Mutex<Vec<Utterance>>,
    pub cancels: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn with_voices(voices: Vec<VoiceInfo>) -> Self {
        Self {
            voices,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    async fn speak(
        &self,
        utterance: Utterance,
        _tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        self.spoken.lock().unwrap().push(utterance);
        Ok(())
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
