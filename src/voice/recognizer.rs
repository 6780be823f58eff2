use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{
    Capability, RecognitionConfig, RecognitionErrorKind, RecognitionEvent, VoiceError, VoiceEvent,
};

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Begin a listening session. Results, errors and the end of the session
    /// arrive on `tx`.
    async fn start(
        &self,
        config: RecognitionConfig,
        tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError>;

    /// End the current session, if any. An `Ended` event still follows.
    async fn stop(&self);
}

/// Recognizer for environments without speech input.
pub struct NoopRecognizer;

#[async_trait]
impl SpeechRecognizer for NoopRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    async fn start(
        &self,
        _config: RecognitionConfig,
        _tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        Err(VoiceError::Unavailable(Capability::Recognition))
    }

    async fn stop(&self) {}
}

/// Recognizer driven by an external transcription program.
///
/// The program receives the session parameters in `PARLEY_LOCALE`,
/// `PARLEY_CONTINUOUS` and `PARLEY_INTERIM`, and prints one transcript per
/// line on stdout: `partial: <text>` for interim results, `error: <code>`
/// for failures, and anything else (optionally prefixed `final:`) as a final
/// transcript. The session ends when the program exits.
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    active: Mutex<Option<CancellationToken>>,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            active: Mutex::new(None),
        }
    }

    fn replace_session(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        match self.active.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, token),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), token),
        }
    }
}

/// Interpret one line of recognizer output.
pub fn parse_transcript_line(line: &str) -> Option<RecognitionEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix("partial:") {
        let text = rest.trim();
        return (!text.is_empty()).then(|| RecognitionEvent::Interim(text.to_string()));
    }
    if let Some(rest) = line.strip_prefix("error:") {
        return Some(RecognitionEvent::Error(RecognitionErrorKind::from_code(
            rest.trim(),
        )));
    }
    let text = line.strip_prefix("final:").unwrap_or(line).trim();
    (!text.is_empty()).then(|| RecognitionEvent::Final(text.to_string()))
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start(
        &self,
        config: RecognitionConfig,
        tx: mpsc::Sender<VoiceEvent>,
    ) -> Result<(), VoiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PARLEY_LOCALE", &config.locale)
            .env("PARLEY_CONTINUOUS", if config.continuous { "1" } else { "0" })
            .env("PARLEY_INTERIM", if config.interim_results { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::StartFailed {
                capability: Capability::Recognition,
                reason: format!("{}: {}", self.program, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| VoiceError::StartFailed {
            capability: Capability::Recognition,
            reason: "recognizer stdout unavailable".to_string(),
        })?;

        let token = CancellationToken::new();
        if let Some(previous) = self.replace_session(Some(token.clone())) {
            previous.cancel();
        }

        let session = config.session;
        let tag = move |event| VoiceEvent::Recognition { session, event };
        let _ = tx.send(tag(RecognitionEvent::Started)).await;

        let interim_results = config.interim_results;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = child.kill().await;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let Some(event) = parse_transcript_line(&line) else {
                                continue;
                            };
                            if !interim_results && matches!(event, RecognitionEvent::Interim(_)) {
                                continue;
                            }
                            if tx.send(tag(event)).await.is_err() {
                                let _ = child.kill().await;
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Failed to read recognizer output: {}", e);
                            let _ = tx
                                .send(tag(RecognitionEvent::Error(
                                    RecognitionErrorKind::Other(e.to_string()),
                                )))
                                .await;
                            let _ = child.kill().await;
                            break;
                        }
                    }
                }
            }
            let _ = child.wait().await;
            let _ = tx.send(tag(RecognitionEvent::Ended)).await;
        });

        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.replace_session(None) {
            token.cancel();
        }
    }
}
