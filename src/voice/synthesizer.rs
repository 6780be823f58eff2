use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;

use super::types::{Capability, SynthesisEvent, Utterance, VoiceError, VoiceEvent, VoiceInfo};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Voices the engine can speak with.
    async fn voices(&self) -> Vec<VoiceInfo>;

    /// Start speaking. Progress for this utterance is reported on `tx`
    /// tagged with its id.
    async fn speak(
        &self,
        utterance: Utterance,
        tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError>;

    /// Silence whatever is being spoken. Cancelled utterances report nothing
    /// further.
    async fn cancel(&self);
}

pub struct NoopSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NoopSynthesizer {
    fn is_available(&self) -> bool {
        false
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }

    async fn speak(
        &self,
        _utterance: Utterance,
        _tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        Err(VoiceError::Unavailable(Capability::Synthesis))
    }

    async fn cancel(&self) {}
}

const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const VOICE_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Synthesizer driving an espeak-ng compatible command line.
pub struct CommandSynthesizer {
    program: String,
    voices: OnceCell<Vec<VoiceInfo>>,
    current: Mutex<Option<CancellationToken>>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            voices: OnceCell::new(),
            current: Mutex::new(None),
        }
    }

    fn replace_current(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        match self.current.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, token),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), token),
        }
    }

    async fn list_voices(&self) -> Vec<VoiceInfo> {
        let output = Command::new(&self.program)
            .arg("--voices")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(VOICE_LIST_TIMEOUT, output).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_voice_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                tracing::warn!("Voice listing exited with {}", output.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to list voices: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("Timed out listing voices");
                Vec::new()
            }
        }
    }
}

/// Command-line arguments for one utterance.
pub fn speak_args(utterance: &Utterance) -> Vec<String> {
    let words_per_minute = (BASE_WORDS_PER_MINUTE * utterance.rate).round().max(80.0) as u32;
    let pitch = (BASE_PITCH * utterance.pitch).round().clamp(0.0, 99.0) as u32;
    let amplitude = (100.0 * utterance.volume).round().clamp(0.0, 200.0) as u32;

    let mut args = Vec::new();
    if let Some(voice) = &utterance.voice {
        args.push("-v".to_string());
        args.push(voice.name.clone());
    }
    args.extend([
        "-s".to_string(),
        words_per_minute.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
        "--".to_string(),
        utterance.text.clone(),
    ]);
    args
}

/// Parse the table printed by `espeak-ng --voices`.
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_, locale, _, name, ..] => Some(VoiceInfo {
                    name: name.to_string(),
                    locale: locale.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_lowercase()
}

/// Pick a voice for `locale`: an exact locale match or a voice whose name
/// contains one of `name_hints`, then any voice in the same base language.
/// `None` leaves the choice to the engine.
pub fn select_voice(voices: &[VoiceInfo], locale: &str, name_hints: &[String]) -> Option<VoiceInfo> {
    let wanted = normalize_locale(locale);
    let hints: Vec<String> = name_hints.iter().map(|h| h.to_lowercase()).collect();

    let preferred = voices.iter().find(|voice| {
        let name = voice.name.to_lowercase();
        normalize_locale(&voice.locale) == wanted
            || hints.iter().any(|hint| !hint.is_empty() && name.contains(hint))
    });
    if let Some(voice) = preferred {
        return Some(voice.clone());
    }

    let language = wanted.split('-').next().unwrap_or_default();
    if language.is_empty() {
        return None;
    }
    voices
        .iter()
        .find(|voice| {
            let voice_locale = normalize_locale(&voice.locale);
            voice_locale == language || voice_locale.starts_with(&format!("{}-", language))
        })
        .cloned()
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        self.voices
            .get_or_init(|| self.list_voices())
            .await
            .clone()
    }

    async fn speak(
        &self,
        utterance: Utterance,
        tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        self.cancel().await;

        let mut child = Command::new(&self.program)
            .args(speak_args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::StartFailed {
                capability: Capability::Synthesis,
                reason: format!("{}: {}", self.program, e),
            })?;

        let token = CancellationToken::new();
        self.replace_current(Some(token.clone()));

        let id = utterance.id;
        let _ = tx.send(VoiceEvent::Synthesis(SynthesisEvent::Started(id))).await;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                }
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => SynthesisEvent::Finished(id),
                        Ok(status) => SynthesisEvent::Failed(id, format!("speech engine exited with {}", status)),
                        Err(e) => SynthesisEvent::Failed(id, e.to_string()),
                    };
                    let _ = tx.send(VoiceEvent::Synthesis(event)).await;
                }
            }
        });

        Ok(())
    }

    async fn cancel(&self) {
        if let Some(token) = self.replace_current(None) {
            token.cancel();
        }
    }
}
