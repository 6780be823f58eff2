use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::config::{AppConfig, CredentialBackend};
use crate::providers::OpenAiProvider;
use crate::services::chat::{CompletionOutcome, PendingCompletion};
use crate::services::export::{self, ExportFormat};
use crate::services::session::{FollowUp, NoticeLevel};
use crate::services::{
    CredentialStore, Database, KeyringService, SessionController, SessionEvent,
};
use crate::ui::commands::{self, Command, HELP};
use crate::ui::terminal::{settings_table, Renderer};
use crate::voice::{
    CommandRecognizer, CommandSynthesizer, NoopRecognizer, NoopSynthesizer, SpeechRecognizer,
    SpeechSynthesizer, VoiceBridge, VoiceEvent,
};

/// Everything the event loop reacts to.
#[derive(Debug)]
pub enum AppMsg {
    Input(String),
    InputClosed,
    Voice(VoiceEvent),
}

/// Results of work the loop started itself.
#[derive(Debug)]
pub enum AppCmd {
    Completion(CompletionOutcome),
    FollowUpDue(FollowUp),
}

enum Flow {
    Continue,
    Quit,
}

pub struct App {
    config: AppConfig,
    session: SessionController,
    renderer: Renderer,
    events: broadcast::Receiver<SessionEvent>,
    cmd_tx: mpsc::Sender<AppCmd>,
    quit_when_idle: bool,
}

impl App {
    async fn async_init(config: &AppConfig) -> Result<(Database, CredentialStore)> {
        let db = match &config.database_path {
            Some(path) => Database::open(path)?,
            None => Database::new_in_memory().context("Failed to open in-memory store")?,
        }
        .with_quota(config.storage_quota);

        let credentials = match config.credentials {
            CredentialBackend::Plain => CredentialStore::Plain(db.clone()),
            CredentialBackend::Keyring => CredentialStore::Keyring(KeyringService::new().await?),
        };
        Ok((db, credentials))
    }

    fn voice_bridge(config: &AppConfig, tx: mpsc::Sender<VoiceEvent>) -> VoiceBridge {
        if config.stt_command.is_none() && config.tts_command.is_none() {
            return VoiceBridge::disabled(tx);
        }
        let recognizer: Arc<dyn SpeechRecognizer> = match &config.stt_command {
            Some((program, args)) => Arc::new(CommandRecognizer::new(program, args.clone())),
            None => Arc::new(NoopRecognizer),
        };
        let synthesizer: Arc<dyn SpeechSynthesizer> = match &config.tts_command {
            Some(program) => Arc::new(CommandSynthesizer::new(program)),
            None => Arc::new(NoopSynthesizer),
        };
        VoiceBridge::new(recognizer, synthesizer, tx)
    }

    fn spawn_completion(&self, pending: PendingCompletion) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let outcome = pending.run().await;
            let _ = tx.send(AppCmd::Completion(outcome)).await;
        });
    }

    fn schedule(&self, follow_up: Option<FollowUp>) {
        let Some(follow_up) = follow_up else {
            return;
        };
        let after = match follow_up {
            FollowUp::SubmitDraft { after } | FollowUp::RestartListening { after } => after,
        };
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(AppCmd::FollowUpDue(follow_up)).await;
        });
    }

    fn flush_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(text) = self.renderer.render(&event) {
                        println!("{}", text);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Renderer skipped {} session events", skipped);
                }
                Err(_) => break,
            }
        }
    }

    async fn update(&mut self, msg: AppMsg) -> Flow {
        match msg {
            AppMsg::Input(line) => match commands::parse(&line) {
                Ok(command) => return self.run_command(command).await,
                Err(e) => self.session.notify(NoticeLevel::Error, e.to_string()),
            },
            AppMsg::InputClosed => {
                if !self.session.is_generating() {
                    return Flow::Quit;
                }
                self.quit_when_idle = true;
            }
            AppMsg::Voice(event) => {
                let follow_up = self.session.handle_voice_event(event).await;
                self.schedule(follow_up);
            }
        }
        Flow::Continue
    }

    async fn update_cmd(&mut self, cmd: AppCmd) -> Flow {
        match cmd {
            AppCmd::Completion(outcome) => {
                let follow_up = self.session.apply_completion(outcome).await;
                if self.quit_when_idle {
                    return Flow::Quit;
                }
                self.schedule(follow_up);
            }
            AppCmd::FollowUpDue(FollowUp::SubmitDraft { .. }) => {
                if let Some(pending) = self.session.submit_draft() {
                    self.spawn_completion(pending);
                }
            }
            AppCmd::FollowUpDue(FollowUp::RestartListening { .. }) => {
                self.session.resume_listening().await;
            }
        }
        Flow::Continue
    }

    async fn run_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Send(text) => {
                if let Some(pending) = self.session.send_user_message(&text) {
                    self.spawn_completion(pending);
                }
            }
            Command::SubmitDraft => {
                if let Some(pending) = self.session.submit_draft() {
                    self.spawn_completion(pending);
                }
            }
            Command::Help => println!("{}", HELP),
            Command::New => {
                self.session.new_conversation().await;
            }
            Command::Chats => {
                let list = self.session.list_conversations();
                println!("{}", self.renderer.conversation_list(&list, Utc::now()));
            }
            Command::Switch(target) => {
                let list = self.session.list_conversations();
                let id = match target.parse::<usize>() {
                    Ok(n) if (1..=list.len()).contains(&n) => list[n - 1].id.clone(),
                    _ => target,
                };
                self.session.switch_conversation(&id);
            }
            Command::Clear => self.session.clear_conversation().await,
            Command::Regenerate => {
                if let Some(pending) = self.session.regenerate_last_reply() {
                    self.spawn_completion(pending);
                }
            }
            Command::Export(format) => self.export(format).await,
            Command::Copy => self.copy_last_reply().await,
            Command::Settings => println!("{}", settings_table(self.session.settings())),
            Command::Set { field, value } => {
                if let Err(e) = self.session.set_setting(&field, &value).await {
                    self.session.notify(NoticeLevel::Error, e.to_string());
                }
            }
            Command::Theme => {
                self.session.toggle_theme().await;
            }
            Command::Key { key, remember } => {
                self.session.set_api_key(&key, remember).await;
            }
            Command::ToggleListening => self.session.toggle_listening().await,
            Command::StopListening => self.session.stop_listening().await,
            Command::StopSpeaking => self.session.stop_speaking().await,
            Command::ResetAll { confirmed: true } => self.session.clear_all_data().await,
            Command::ResetAll { confirmed: false } => self.session.notify(
                NoticeLevel::Info,
                "Type /reset-all confirm to erase everything stored",
            ),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    async fn export(&self, format: ExportFormat) {
        let Some(snapshot) = self.session.export_conversation() else {
            return;
        };
        let path = self
            .config
            .export_dir
            .join(export::file_name(&snapshot.title, Utc::now(), format));

        let written = match snapshot.render(format) {
            Ok(contents) => tokio::fs::write(&path, contents)
                .await
                .with_context(|| format!("Failed to write {}", path.display())),
            Err(e) => Err(e.into()),
        };
        match written {
            Ok(()) => {
                tracing::info!("Exported conversation to {}", path.display());
                self.session.notify(
                    NoticeLevel::Info,
                    format!("Chat exported successfully! ({})", path.display()),
                );
            }
            Err(e) => {
                tracing::error!("Export failed: {:#}", e);
                self.session
                    .notify(NoticeLevel::Error, format!("Export failed: {:#}", e));
            }
        }
    }

    async fn copy_last_reply(&self) {
        let Some(reply) = self.session.last_reply() else {
            self.session.notify(NoticeLevel::Info, "No reply to copy yet");
            return;
        };
        let Some(clipboard) = &self.config.clipboard else {
            self.session.notify(
                NoticeLevel::Error,
                "No clipboard command configured (--clipboard-command)",
            );
            return;
        };
        match clipboard.copy(&reply).await {
            Ok(()) => self.session.notify(NoticeLevel::Info, "Copied to clipboard!"),
            Err(e) => {
                tracing::error!("Clipboard copy failed: {:#}", e);
                self.session
                    .notify(NoticeLevel::Error, "Failed to copy to clipboard");
            }
        }
    }
}

/// Run the interactive session until the user quits or stdin closes.
pub async fn run(config: AppConfig) -> Result<()> {
    let (db, credentials) = App::async_init(&config).await?;
    let provider = Arc::new(OpenAiProvider::new(
        &config.base_url,
        config.completion_timeout,
    )?);
    tracing::info!("Using completion endpoint {}", provider.endpoint());

    let (voice_tx, mut voice_rx) = mpsc::channel(64);
    let voice = App::voice_bridge(&config, voice_tx);

    let (events_tx, events) = broadcast::channel(256);
    let session = SessionController::start(db, credentials, provider, voice, events_tx).await;

    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    let (msg_tx, mut msg_rx) = mpsc::channel(16);

    let mut app = App {
        renderer: Renderer::new(config.color),
        config,
        session,
        events,
        cmd_tx,
        quit_when_idle: false,
    };

    if !app.session.has_api_key() {
        if let Some(key) = app.config.api_key.clone() {
            let remember = app.session.settings().save_api_key;
            app.session.set_api_key(&key, remember).await;
        } else {
            app.session.notify(
                NoticeLevel::Info,
                "Enter your OpenAI API key with /key <api-key> [--remember]",
            );
        }
    }
    app.flush_events();

    let input_tx = msg_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if input_tx.send(AppMsg::Input(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
        let _ = input_tx.send(AppMsg::InputClosed).await;
    });

    tokio::spawn(async move {
        while let Some(event) = voice_rx.recv().await {
            if msg_tx.send(AppMsg::Voice(event)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let flow = tokio::select! {
            Some(msg) = msg_rx.recv() => app.update(msg).await,
            Some(cmd) = cmd_rx.recv() => app.update_cmd(cmd).await,
            else => Flow::Quit,
        };
        app.flush_events();
        if let Flow::Quit = flow {
            break;
        }
    }

    app.session.stop_listening().await;
    app.session.stop_speaking().await;
    tracing::info!("Session ended");
    Ok(())
}
