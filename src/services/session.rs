use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Message, Role, DEFAULT_CONVERSATION_ID};
use crate::providers::CompletionProvider;
use crate::services::chat::{self, CompletionOutcome, PendingCompletion};
use crate::services::conversation::ConversationStore;
use crate::services::credentials::{CredentialError, CredentialStore};
use crate::services::database::{Database, StorageError};
use crate::services::export::ExportSnapshot;
use crate::services::settings::{ListeningMode, Settings, SettingsError, SettingsService, Theme};
use crate::voice::{RecognitionEvent, SpeechProgress, VoiceBridge, VoiceError, VoiceEvent};

pub const AUTO_SUBMIT_DELAY: Duration = Duration::from_millis(500);
pub const LISTEN_RESTART_DELAY: Duration = Duration::from_millis(1000);
pub const RESUME_AFTER_SPEECH_DELAY: Duration = Duration::from_millis(500);

const QUOTA_NOTICE: &str = "Storage quota exceeded. Consider exporting old chats.";
const INVALID_KEY_NOTICE: &str = "Please enter a valid API key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub active: bool,
}

/// Notifications for whatever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Redraw the transcript. `messages` excludes the system prompt.
    ConversationLoaded {
        conversation_id: String,
        title: String,
        messages: Vec<Message>,
    },
    MessageAppended {
        conversation_id: String,
        message: Message,
    },
    ConversationListChanged(Vec<ConversationSummary>),
    GeneratingChanged(bool),
    ListeningChanged(bool),
    SpeakingChanged(bool),
    VoiceStatus(String),
    InterimTranscript(String),
    DraftChanged(String),
    ThemeChanged(Theme),
    SettingsChanged(Settings),
    Notice { level: NoticeLevel, text: String },
}

/// Work the session wants done later, on the caller's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    SubmitDraft { after: Duration },
    RestartListening { after: Duration },
}

/// Owns the active conversation, settings and voice state. Every mutation
/// goes through here and is announced as a [`SessionEvent`].
pub struct SessionController {
    db: Database,
    credentials: CredentialStore,
    provider: Arc<dyn CompletionProvider>,
    voice: VoiceBridge,
    settings: Settings,
    conversations: ConversationStore,
    current_id: String,
    api_key: Option<String>,
    generating: bool,
    draft: String,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Load settings, conversations and any remembered API key, then open the
    /// `default` conversation.
    pub async fn start(
        db: Database,
        credentials: CredentialStore,
        provider: Arc<dyn CompletionProvider>,
        voice: VoiceBridge,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let settings = SettingsService::load(&db).await;
        let conversations = ConversationStore::load(&db).await;
        let api_key = match credentials.load().await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Failed to load saved API key: {}", e);
                None
            }
        };

        let mut session = Self {
            db,
            credentials,
            provider,
            voice,
            settings,
            conversations,
            current_id: DEFAULT_CONVERSATION_ID.to_string(),
            api_key,
            generating: false,
            draft: String::new(),
            events,
        };
        session
            .conversations
            .ensure(DEFAULT_CONVERSATION_ID, &session.settings.system_prompt);

        tracing::info!(
            "Session started with {} conversation(s), API key {}",
            session.conversations.len(),
            if session.api_key.is_some() { "loaded" } else { "not set" }
        );

        session.emit(SessionEvent::ThemeChanged(session.settings.theme));
        session.emit(SessionEvent::SettingsChanged(session.settings.clone()));
        session.emit_conversation_loaded();
        session.emit_conversation_list();
        session.emit_voice_status();
        session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn current_conversation_id(&self) -> &str {
        &self.current_id
    }

    pub fn messages(&self) -> &[Message] {
        self.conversations
            .get(&self.current_id)
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn is_listening(&self) -> bool {
        self.voice.is_listening()
    }

    pub fn is_speaking(&self) -> bool {
        self.voice.is_speaking()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        self.emit(SessionEvent::Notice {
            level,
            text: text.into(),
        });
    }

    /// Append a user turn and hand back the completion to run. `None` when
    /// the text is blank, a request is already in flight, or there is no key.
    pub fn send_user_message(&mut self, text: &str) -> Option<PendingCompletion> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.generating {
            tracing::debug!("Ignoring message while a reply is pending");
            return None;
        }
        let Some(api_key) = self.api_key.clone() else {
            self.notify(NoticeLevel::Error, INVALID_KEY_NOTICE);
            return None;
        };

        let conversation = self
            .conversations
            .ensure(&self.current_id, &self.settings.system_prompt);
        let message = Message::user(text);
        conversation.push(message.clone());
        let request = chat::build_request(&api_key, &conversation.messages, &self.settings);

        self.emit(SessionEvent::MessageAppended {
            conversation_id: self.current_id.clone(),
            message,
        });
        if !self.draft.is_empty() {
            self.draft.clear();
            self.emit(SessionEvent::DraftChanged(String::new()));
        }
        self.set_generating(true);

        Some(PendingCompletion::new(
            self.provider.clone(),
            self.current_id.clone(),
            request,
        ))
    }

    /// Record the result of a completion started by
    /// [`SessionController::send_user_message`].
    pub async fn apply_completion(&mut self, outcome: CompletionOutcome) -> Option<FollowUp> {
        self.set_generating(false);

        let Some(conversation) = self.conversations.get_mut(&outcome.conversation_id) else {
            tracing::debug!(
                "Dropping reply for vanished conversation {}",
                outcome.conversation_id
            );
            return None;
        };

        let reply = match outcome.result {
            Ok(response) => {
                let message = Message::assistant(response.content);
                conversation.push(message.clone());
                self.emit_appended(&outcome.conversation_id, message.clone());
                self.persist_conversations().await;
                Some(message.content)
            }
            Err(e) => {
                let text = e.to_string();
                conversation.push(Message::error(text.clone()));
                self.emit_appended(&outcome.conversation_id, Message::error(text.clone()));
                self.notify(NoticeLevel::Error, text);
                None
            }
        };

        if let Some(reply) = reply {
            if self.settings.voice_enabled && self.settings.auto_speak && self.speak(&reply).await
            {
                return None;
            }
        }
        self.continuous_restart(LISTEN_RESTART_DELAY)
    }

    /// Replace the closing user/assistant exchange by asking again with the
    /// same user text. A transcript that ends any other way, such as a failed
    /// send, is left alone.
    pub fn regenerate_last_reply(&mut self) -> Option<PendingCompletion> {
        if self.generating || self.api_key.is_none() {
            return None;
        }
        let conversation = self.conversations.get_mut(&self.current_id)?;
        let Some(user) = conversation.pop_exchange() else {
            tracing::debug!("Nothing to regenerate in {}", self.current_id);
            return None;
        };
        self.emit_conversation_loaded();
        self.send_user_message(&user.content)
    }

    pub fn switch_conversation(&mut self, id: &str) {
        let id = id.trim();
        if id.is_empty() {
            return;
        }
        self.current_id = id.to_string();
        self.conversations
            .ensure(&self.current_id, &self.settings.system_prompt);
        tracing::debug!("Switched to conversation {}", self.current_id);
        self.emit_conversation_loaded();
        self.emit_conversation_list();
    }

    pub async fn new_conversation(&mut self) -> String {
        let id = self.conversations.fresh_id();
        self.switch_conversation(&id);
        self.persist_conversations().await;
        self.notify(NoticeLevel::Info, "New chat created");
        id
    }

    pub async fn clear_conversation(&mut self) {
        self.conversations
            .ensure(&self.current_id, &self.settings.system_prompt)
            .reset(&self.settings.system_prompt);
        self.emit_conversation_loaded();
        self.persist_conversations().await;
        self.notify(NoticeLevel::Info, "Chat cleared");
    }

    pub fn export_conversation(&self) -> Option<ExportSnapshot> {
        let conversation = self.conversations.get(&self.current_id)?;
        Some(ExportSnapshot::new(conversation, self.settings.sampling()))
    }

    pub fn list_conversations(&self) -> Vec<ConversationSummary> {
        self.conversations
            .list()
            .into_iter()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                timestamp: c.timestamp,
                active: c.id == self.current_id,
            })
            .collect()
    }

    /// Text of the latest assistant turn in the active conversation.
    pub fn last_reply(&self) -> Option<String> {
        self.conversations
            .get(&self.current_id)?
            .last_message(Role::Assistant)
            .map(|m| m.content.clone())
    }

    /// Replace the settings, applying side effects of what changed, then
    /// persist.
    pub async fn update_settings(&mut self, next: Settings) {
        let previous = std::mem::replace(&mut self.settings, next);

        if previous.system_prompt != self.settings.system_prompt {
            if let Some(conversation) = self.conversations.get_mut(&self.current_id) {
                conversation.set_system_prompt(&self.settings.system_prompt);
            }
        }
        if previous.voice_enabled && !self.settings.voice_enabled {
            self.stop_listening().await;
            self.stop_speaking().await;
        } else if previous.listening_mode != self.settings.listening_mode {
            self.stop_listening().await;
        }
        if previous.theme != self.settings.theme {
            self.emit(SessionEvent::ThemeChanged(self.settings.theme));
        }
        if previous.save_api_key != self.settings.save_api_key {
            self.sync_credential().await;
        }

        self.persist_settings().await;
        self.emit(SessionEvent::SettingsChanged(self.settings.clone()));
        self.emit_voice_status();
    }

    /// Change one setting from its textual form.
    pub async fn set_setting(&mut self, field: &str, value: &str) -> Result<(), SettingsError> {
        let mut next = self.settings.clone();
        next.apply_field(field, value)?;
        self.update_settings(next).await;
        Ok(())
    }

    pub async fn toggle_theme(&mut self) -> Theme {
        let mut next = self.settings.clone();
        next.theme = next.theme.toggled();
        self.update_settings(next).await;
        self.settings.theme
    }

    /// Use `key` for completions; remember it across runs only if asked.
    pub async fn set_api_key(&mut self, key: &str, remember: bool) -> bool {
        let key = key.trim();
        if key.is_empty() {
            self.notify(NoticeLevel::Error, INVALID_KEY_NOTICE);
            return false;
        }

        self.api_key = Some(key.to_string());
        if self.settings.save_api_key != remember {
            self.settings.save_api_key = remember;
            self.persist_settings().await;
            self.emit(SessionEvent::SettingsChanged(self.settings.clone()));
        }
        self.sync_credential().await;

        self.notify(NoticeLevel::Info, "Chat initialized successfully!");
        true
    }

    /// Wipe settings, conversations and the remembered key, then start over
    /// on the `default` conversation.
    pub async fn clear_all_data(&mut self) {
        self.stop_listening().await;
        self.stop_speaking().await;

        if let Err(e) = self.db.clear().await {
            tracing::error!("Failed to clear stored data: {}", e);
            self.notify(NoticeLevel::Error, "Failed to clear stored data");
        }
        if let Err(e) = self.credentials.clear().await {
            tracing::warn!("Failed to clear saved API key: {}", e);
        }

        self.settings = Settings::default();
        self.conversations.clear();
        self.api_key = None;
        self.draft.clear();
        self.current_id = DEFAULT_CONVERSATION_ID.to_string();
        self.conversations
            .ensure(&self.current_id, &self.settings.system_prompt);

        tracing::info!("All stored data cleared");
        self.emit(SessionEvent::ThemeChanged(self.settings.theme));
        self.emit(SessionEvent::SettingsChanged(self.settings.clone()));
        self.emit(SessionEvent::DraftChanged(String::new()));
        self.emit_conversation_loaded();
        self.emit_conversation_list();
        self.emit_voice_status();
        self.notify(NoticeLevel::Info, "All data cleared");
    }

    pub async fn toggle_listening(&mut self) {
        if !self.settings.voice_enabled {
            self.notify(
                NoticeLevel::Error,
                "Voice features are disabled. Enable them in settings.",
            );
            return;
        }
        if !self.voice.can_listen() {
            self.notify(NoticeLevel::Error, "Speech recognition not available");
            return;
        }

        if self.voice.is_listening() {
            self.stop_listening().await;
        } else {
            self.start_listening().await;
        }
    }

    pub async fn start_listening(&mut self) {
        if !self.settings.voice_enabled || self.generating {
            return;
        }
        match self.voice.start_listening(&self.settings).await {
            Ok(true) => {
                self.emit(SessionEvent::ListeningChanged(true));
                self.emit_voice_status();
            }
            Ok(false) => {}
            Err(VoiceError::Unavailable(_)) => {
                self.notify(NoticeLevel::Error, "Speech recognition not available");
            }
            Err(e) => {
                tracing::error!("Failed to start recognition: {}", e);
                self.notify(NoticeLevel::Error, "Failed to start voice input");
            }
        }
    }

    pub async fn stop_listening(&mut self) {
        if self.voice.stop_listening().await {
            self.emit(SessionEvent::ListeningChanged(false));
            self.emit_voice_status();
        }
    }

    pub async fn stop_speaking(&mut self) {
        if self.voice.stop_speaking().await {
            self.emit(SessionEvent::SpeakingChanged(false));
            self.emit_voice_status();
        }
    }

    /// Resume listening for a scheduled restart, if still appropriate.
    pub async fn resume_listening(&mut self) {
        if self.settings.voice_enabled && !self.generating && !self.voice.is_listening() {
            self.start_listening().await;
        }
    }

    /// Send the transcribed draft.
    pub fn submit_draft(&mut self) -> Option<PendingCompletion> {
        let draft = self.draft.clone();
        self.send_user_message(&draft)
    }

    pub async fn handle_voice_event(&mut self, event: VoiceEvent) -> Option<FollowUp> {
        match event {
            VoiceEvent::Recognition { session, event } => {
                self.handle_recognition(session, event).await
            }
            VoiceEvent::Synthesis(event) => {
                match self.voice.on_synthesis(&event)? {
                    SpeechProgress::Started => {
                        self.emit(SessionEvent::SpeakingChanged(true));
                        self.emit_voice_status();
                        None
                    }
                    SpeechProgress::Finished => {
                        self.emit(SessionEvent::SpeakingChanged(false));
                        self.emit_voice_status();
                        self.continuous_restart(RESUME_AFTER_SPEECH_DELAY)
                    }
                    SpeechProgress::Failed(reason) => {
                        tracing::error!("Speech synthesis failed: {}", reason);
                        self.emit(SessionEvent::SpeakingChanged(false));
                        self.emit_voice_status();
                        self.notify(NoticeLevel::Error, "Speech output error");
                        None
                    }
                }
            }
        }
    }

    async fn handle_recognition(
        &mut self,
        session: Uuid,
        event: RecognitionEvent,
    ) -> Option<FollowUp> {
        let ended_by_itself = self.voice.on_recognition(session, &event)?;
        match event {
            RecognitionEvent::Started => {
                self.emit(SessionEvent::ListeningChanged(true));
                self.emit_voice_status();
                None
            }
            RecognitionEvent::Interim(text) => {
                self.emit(SessionEvent::InterimTranscript(text));
                None
            }
            RecognitionEvent::Final(text) => {
                self.draft = text;
                self.emit(SessionEvent::DraftChanged(self.draft.clone()));
                if self.settings.listening_mode != ListeningMode::Click {
                    return None;
                }
                self.stop_listening().await;
                let trimmed = self.draft.trim();
                trimmed
                    .ends_with(['.', '?', '!'])
                    .then_some(FollowUp::SubmitDraft {
                        after: AUTO_SUBMIT_DELAY,
                    })
            }
            RecognitionEvent::Error(kind) => {
                tracing::warn!("Speech recognition error: {:?}", kind);
                self.emit(SessionEvent::ListeningChanged(false));
                self.emit_voice_status();
                self.notify(NoticeLevel::Error, kind.user_message());
                None
            }
            RecognitionEvent::Ended => {
                self.emit(SessionEvent::ListeningChanged(false));
                self.emit_voice_status();
                if ended_by_itself {
                    self.continuous_restart(LISTEN_RESTART_DELAY)
                } else {
                    None
                }
            }
        }
    }

    pub fn voice_status(&self) -> String {
        let status = if !self.settings.voice_enabled {
            "Voice disabled"
        } else if self.voice.is_speaking() {
            "Speaking..."
        } else if self.voice.is_listening() {
            "Listening..."
        } else if self.settings.listening_mode == ListeningMode::Continuous {
            "Continuous listening mode"
        } else {
            "Click mic for voice input"
        };
        status.to_string()
    }

    fn continuous_restart(&self, after: Duration) -> Option<FollowUp> {
        (self.settings.listening_mode == ListeningMode::Continuous
            && self.settings.voice_enabled
            && !self.generating
            && !self.voice.is_listening()
            && self.voice.can_listen())
        .then_some(FollowUp::RestartListening { after })
    }

    /// Returns whether an utterance was started.
    async fn speak(&mut self, text: &str) -> bool {
        match self.voice.speak(text, &self.settings).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(VoiceError::Unavailable(_)) => false,
            Err(e) => {
                tracing::error!("Failed to speak reply: {}", e);
                self.notify(NoticeLevel::Error, "Failed to speak text");
                false
            }
        }
    }

    async fn sync_credential(&mut self) {
        let result = match (&self.api_key, self.settings.save_api_key) {
            (Some(key), true) => self.credentials.store(key).await,
            _ => self.credentials.clear().await,
        };
        match result {
            Ok(()) => {}
            Err(CredentialError::Storage(e)) => self.report_storage_error("API key", e),
            Err(e) => {
                tracing::error!("Failed to update saved API key: {}", e);
                self.notify(NoticeLevel::Error, "Failed to update saved API key");
            }
        }
    }

    async fn persist_conversations(&mut self) {
        if let Err(e) = self.conversations.save(&self.db).await {
            self.report_storage_error("conversations", e);
        }
        self.emit_conversation_list();
    }

    async fn persist_settings(&mut self) {
        if let Err(e) = SettingsService::save(&self.db, &self.settings).await {
            self.report_storage_error("settings", e);
        }
    }

    fn report_storage_error(&self, what: &str, e: StorageError) {
        tracing::error!("Failed to save {}: {}", what, e);
        match e {
            StorageError::QuotaExceeded { .. } => self.notify(NoticeLevel::Error, QUOTA_NOTICE),
            _ => self.notify(NoticeLevel::Error, format!("Failed to save {}", what)),
        }
    }

    fn set_generating(&mut self, generating: bool) {
        self.generating = generating;
        self.emit(SessionEvent::GeneratingChanged(generating));
    }

    fn emit_appended(&self, conversation_id: &str, message: Message) {
        if conversation_id == self.current_id {
            self.emit(SessionEvent::MessageAppended {
                conversation_id: conversation_id.to_string(),
                message,
            });
        }
    }

    fn emit_conversation_loaded(&self) {
        let Some(conversation) = self.conversations.get(&self.current_id) else {
            return;
        };
        self.emit(SessionEvent::ConversationLoaded {
            conversation_id: conversation.id.clone(),
            title: conversation.title.clone(),
            messages: conversation.visible_messages().cloned().collect(),
        });
    }

    fn emit_conversation_list(&self) {
        self.emit(SessionEvent::ConversationListChanged(
            self.list_conversations(),
        ));
    }

    fn emit_voice_status(&self) {
        self.emit(SessionEvent::VoiceStatus(self.voice_status()));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::providers::{CompletionError, CompletionRequest, CompletionResponse};
    use crate::voice::testing::{FakeRecognizer, FakeSynthesizer};
    use crate::voice::{RecognitionErrorKind, SynthesisEvent};

    #[derive(Default)]
    struct MockProvider {
        replies: Mutex<VecDeque<Result<CompletionResponse, CompletionError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockProvider {
        fn replying(replies: Vec<Result<&str, CompletionError>>) -> Arc<Self> {
            let replies = replies
                .into_iter()
                .map(|r| {
                    r.map(|content| CompletionResponse {
                        content: content.to_string(),
                        model: "gpt-4o-mini".to_string(),
                        tokens_in: None,
                        tokens_out: None,
                    })
                })
                .collect();
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::unknown("no scripted reply")))
        }
    }

    struct Harness {
        session: SessionController,
        events: broadcast::Receiver<SessionEvent>,
        provider: Arc<MockProvider>,
        recognizer: Arc<FakeRecognizer>,
        synthesizer: Arc<FakeSynthesizer>,
        db: Database,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        /// Deliver `event` as if from listening session `session`.
        async fn hear_from(&mut self, session: Uuid, event: RecognitionEvent) -> Option<FollowUp> {
            self.session
                .handle_voice_event(VoiceEvent::Recognition { session, event })
                .await
        }

        /// Deliver `event` from the most recently started listening session.
        async fn hear(&mut self, event: RecognitionEvent) -> Option<FollowUp> {
            let session = self.recognizer.last_session().unwrap();
            self.hear_from(session, event).await
        }

        fn notices(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::Notice { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    impl SessionController {
        /// Send and apply the reply in one step. Returns whether a request
        /// was made.
        async fn send_and_wait(&mut self, text: &str) -> bool {
            let Some(pending) = self.send_user_message(text) else {
                return false;
            };
            let outcome = pending.run().await;
            self.apply_completion(outcome).await;
            true
        }
    }

    async fn harness_with(db: Database, provider: Arc<MockProvider>) -> Harness {
        let (events_tx, events) = broadcast::channel(256);
        let (voice_tx, _voice_rx) = mpsc::channel(8);
        let recognizer = Arc::new(FakeRecognizer::default());
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let voice = VoiceBridge::new(recognizer.clone(), synthesizer.clone(), voice_tx);

        let session = SessionController::start(
            db.clone(),
            CredentialStore::Plain(db.clone()),
            provider.clone(),
            voice,
            events_tx,
        )
        .await;

        Harness {
            session,
            events,
            provider,
            recognizer,
            synthesizer,
            db,
        }
    }

    async fn harness(replies: Vec<Result<&str, CompletionError>>) -> Harness {
        let db = Database::new_in_memory().unwrap();
        let mut h = harness_with(db, MockProvider::replying(replies)).await;
        h.session.set_api_key("sk-test", false).await;
        // Speech output is not the subject of most tests.
        h.session.set_setting("auto_speak", "false").await.unwrap();
        h.drain();
        h
    }

    fn roles(session: &SessionController) -> Vec<Role> {
        session.messages().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_hello_gets_reply() {
        let mut h = harness(vec![Ok("Hi there")]).await;

        assert!(h.session.send_and_wait("Hello").await);

        assert_eq!(
            h.session.messages(),
            &[
                Message::system("You are a helpful assistant."),
                Message::user("Hello"),
                Message::assistant("Hi there"),
            ]
        );
        assert!(!h.session.is_generating());

        let stored = ConversationStore::load(&h.db).await;
        assert_eq!(stored.get("default").unwrap().messages, h.session.messages());
    }

    #[tokio::test]
    async fn test_request_carries_history_and_sampling() {
        let mut h = harness(vec![Ok("Hi there")]).await;
        h.session.set_setting("temperature", "1.1").await.unwrap();

        h.session.send_and_wait("Hello").await;

        let request = &h.provider.requests()[0];
        assert_eq!(request.api_key, "sk-test");
        assert_eq!(request.temperature, 1.1);
        assert_eq!(
            request.messages,
            vec![
                Message::system("You are a helpful assistant."),
                Message::user("Hello")
            ]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_appends_error_and_keeps_key() {
        let mut h = harness(vec![Err(CompletionError::Unauthorized)]).await;

        h.session.send_and_wait("X").await;

        assert_eq!(
            &h.session.messages()[1..],
            &[
                Message::user("X"),
                Message::error("Invalid API key. Please check your key and try again."),
            ]
        );
        assert!(h.session.has_api_key());
        assert!(h
            .notices()
            .contains(&"Invalid API key. Please check your key and try again.".to_string()));
        // Failures are not persisted.
        assert!(ConversationStore::load(&h.db).await.is_empty());
    }

    #[tokio::test]
    async fn test_each_send_adds_two_messages() {
        let mut h = harness(vec![Ok("one"), Err(CompletionError::RateLimited)]).await;

        h.session.send_and_wait("first").await;
        assert_eq!(h.session.messages().len(), 3);
        h.session.send_and_wait("second").await;
        assert_eq!(h.session.messages().len(), 5);
        assert_eq!(h.session.messages()[4].role, Role::Error);
    }

    #[tokio::test]
    async fn test_error_turns_are_not_sent_upstream() {
        let mut h = harness(vec![Err(CompletionError::RateLimited), Ok("ok")]).await;

        h.session.send_and_wait("first").await;
        h.session.send_and_wait("second").await;

        let sent: Vec<Role> = h.provider.requests()[1]
            .messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(sent, vec![Role::System, Role::User, Role::User]);
    }

    #[tokio::test]
    async fn test_second_send_while_pending_is_ignored() {
        let mut h = harness(vec![Ok("reply")]).await;

        let pending = h.session.send_user_message("first").unwrap();
        assert!(h.session.send_user_message("second").is_none());
        assert_eq!(h.session.messages().len(), 2);
        assert!(h.provider.requests().is_empty());

        let outcome = pending.run().await;
        h.session.apply_completion(outcome).await;

        assert_eq!(h.provider.requests().len(), 1);
        assert_eq!(h.session.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_message_is_ignored() {
        let mut h = harness(vec![]).await;
        assert!(h.session.send_user_message("   \n").is_none());
        assert_eq!(h.session.messages().len(), 1);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_key_notifies() {
        let db = Database::new_in_memory().unwrap();
        let mut h = harness_with(db, MockProvider::replying(vec![])).await;
        h.drain();

        assert!(h.session.send_user_message("Hello").is_none());
        assert_eq!(h.session.messages().len(), 1);
        assert_eq!(h.notices(), vec![INVALID_KEY_NOTICE.to_string()]);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_last_pair() {
        let mut h = harness(vec![Ok("first answer"), Ok("second answer")]).await;
        h.session.send_and_wait("question").await;
        let before = h.session.messages().len();

        let pending = h.session.regenerate_last_reply().unwrap();
        let outcome = pending.run().await;
        h.session.apply_completion(outcome).await;

        assert_eq!(h.session.messages().len(), before);
        assert_eq!(
            &h.session.messages()[1..],
            &[Message::user("question"), Message::assistant("second answer")]
        );
        let last_request = h.provider.requests().pop().unwrap();
        assert_eq!(last_request.messages.last(), Some(&Message::user("question")));
    }

    #[tokio::test]
    async fn test_regenerate_after_failed_send_is_noop() {
        let mut h = harness(vec![Ok("a1"), Err(CompletionError::RateLimited)]).await;
        h.session.send_and_wait("u1").await;
        h.session.send_and_wait("u2").await;
        let before = h.session.messages().to_vec();

        assert!(h.session.regenerate_last_reply().is_none());

        assert_eq!(h.session.messages(), before.as_slice());
        assert_eq!(
            &h.session.messages()[1..],
            &[
                Message::user("u1"),
                Message::assistant("a1"),
                Message::user("u2"),
                Message::error("Rate limit exceeded. Please wait a moment and try again."),
            ]
        );
        assert_eq!(h.provider.requests().len(), 2);
        assert!(!h.session.is_generating());
    }

    #[tokio::test]
    async fn test_regenerate_while_pending_is_noop() {
        let mut h = harness(vec![Ok("first answer"), Ok("follow-up answer")]).await;
        h.session.send_and_wait("question").await;
        let pending = h.session.send_user_message("follow-up").unwrap();

        assert!(h.session.regenerate_last_reply().is_none());
        assert_eq!(h.session.messages().len(), 4);

        h.session.apply_completion(pending.run().await).await;
        assert_eq!(h.provider.requests().len(), 2);
        assert_eq!(
            h.session.messages().last(),
            Some(&Message::assistant("follow-up answer"))
        );
    }

    #[tokio::test]
    async fn test_regenerate_without_reply_is_noop() {
        let mut h = harness(vec![]).await;
        assert!(h.session.regenerate_last_reply().is_none());
        assert_eq!(h.session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_leaves_only_system_prompt() {
        let mut h = harness(vec![Ok("Hi")]).await;
        h.session.send_and_wait("Hello").await;

        h.session.clear_conversation().await;

        assert_eq!(roles(&h.session), vec![Role::System]);
        let stored = ConversationStore::load(&h.db).await;
        assert_eq!(stored.get("default").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_switch_to_unseen_conversation() {
        let mut h = harness(vec![]).await;
        h.session.set_setting("system_prompt", "Be terse.").await.unwrap();

        h.session.switch_conversation("chat-42");

        assert_eq!(h.session.current_conversation_id(), "chat-42");
        assert_eq!(h.session.messages(), &[Message::system("Be terse.")]);
        let loaded = h.drain().into_iter().any(|e| {
            matches!(e, SessionEvent::ConversationLoaded { conversation_id, messages, .. }
                if conversation_id == "chat-42" && messages.is_empty())
        });
        assert!(loaded);
    }

    #[tokio::test]
    async fn test_new_conversation_is_persisted() {
        let mut h = harness(vec![]).await;

        let id = h.session.new_conversation().await;

        assert!(id.starts_with("chat-"));
        let stored = ConversationStore::load(&h.db).await;
        assert_eq!(stored.get(&id).unwrap().title, "Chat 2");
        let list = h.session.list_conversations();
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|c| c.id == id && c.active));
    }

    #[tokio::test]
    async fn test_reply_lands_in_originating_conversation() {
        let mut h = harness(vec![Ok("late reply")]).await;
        let pending = h.session.send_user_message("Hello").unwrap();
        h.session.switch_conversation("chat-2");

        let outcome = pending.run().await;
        h.session.apply_completion(outcome).await;

        assert_eq!(h.session.messages().len(), 1);
        h.session.switch_conversation("default");
        assert_eq!(
            h.session.messages().last(),
            Some(&Message::assistant("late reply"))
        );
    }

    #[tokio::test]
    async fn test_system_prompt_change_rewrites_first_message() {
        let mut h = harness(vec![Ok("Hi")]).await;
        h.session.send_and_wait("Hello").await;

        h.session.set_setting("system_prompt", "Be terse.").await.unwrap();

        assert_eq!(h.session.messages()[0], Message::system("Be terse."));
        assert_eq!(h.session.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_export_excludes_system_prompt() {
        let mut h = harness(vec![Ok("Hi there")]).await;
        h.session.send_and_wait("Hello").await;

        let snapshot = h.session.export_conversation().unwrap();

        assert_eq!(snapshot.title, "Chat 1");
        assert_eq!(
            snapshot.messages,
            vec![Message::user("Hello"), Message::assistant("Hi there")]
        );
        assert_eq!(snapshot.settings.max_tokens, 500);
    }

    #[tokio::test]
    async fn test_quota_failure_notifies_and_keeps_memory_state() {
        let db = Database::new_in_memory().unwrap().with_quota(Some(600));
        let long_reply = "long ".repeat(200);
        let mut h = harness_with(db, MockProvider::replying(vec![Ok(long_reply.as_str())])).await;
        h.session.set_api_key("sk-test", false).await;
        h.drain();

        h.session.send_and_wait("Hello").await;

        assert_eq!(h.session.messages().len(), 3);
        assert!(h.notices().contains(&QUOTA_NOTICE.to_string()));
    }

    #[tokio::test]
    async fn test_set_api_key_rejects_blank_and_remembers_on_request() {
        let db = Database::new_in_memory().unwrap();
        let mut h = harness_with(db.clone(), MockProvider::replying(vec![])).await;
        h.drain();

        assert!(!h.session.set_api_key("  ", true).await);
        assert_eq!(h.notices(), vec![INVALID_KEY_NOTICE.to_string()]);
        assert!(!h.session.has_api_key());

        assert!(h.session.set_api_key("sk-live", true).await);
        assert_eq!(db.get("api_key").await.unwrap().as_deref(), Some("sk-live"));
        assert!(SettingsService::load(&db).await.save_api_key);

        // A later session picks the key up again.
        let again = harness_with(db.clone(), MockProvider::replying(vec![])).await;
        assert!(again.session.has_api_key());

        h.session.set_api_key("sk-live", false).await;
        assert_eq!(db.get("api_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_all_data_resets_session() {
        let mut h = harness(vec![Ok("Hi")]).await;
        h.session.send_and_wait("Hello").await;
        h.session.new_conversation().await;
        h.session.toggle_theme().await;

        h.session.clear_all_data().await;

        assert_eq!(h.session.current_conversation_id(), "default");
        assert_eq!(roles(&h.session), vec![Role::System]);
        assert_eq!(h.session.settings(), &Settings::default());
        assert!(!h.session.has_api_key());
        assert_eq!(h.session.list_conversations().len(), 1);
        assert_eq!(h.db.get("conversations").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_toggle_theme_persists() {
        let mut h = harness(vec![]).await;
        assert_eq!(h.session.toggle_theme().await, Theme::Dark);
        assert_eq!(SettingsService::load(&h.db).await.theme, Theme::Dark);
        assert!(h
            .drain()
            .contains(&SessionEvent::ThemeChanged(Theme::Dark)));
    }

    #[tokio::test]
    async fn test_auto_speak_reply() {
        let mut h = harness(vec![Ok("**Hi** there")]).await;
        h.session.set_setting("auto_speak", "true").await.unwrap();

        h.session.send_and_wait("Hello").await;

        let spoken = h.synthesizer.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "Hi there.");
    }

    #[tokio::test]
    async fn test_no_speech_when_voice_disabled() {
        let mut h = harness(vec![Ok("Hi")]).await;
        h.session.set_setting("auto_speak", "true").await.unwrap();
        h.session.set_setting("voice_enabled", "false").await.unwrap();

        h.session.send_and_wait("Hello").await;

        assert!(h.synthesizer.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_listening_when_disabled_notifies() {
        let mut h = harness(vec![]).await;
        h.session.set_setting("voice_enabled", "false").await.unwrap();
        h.drain();

        h.session.toggle_listening().await;

        assert_eq!(h.recognizer.start_count(), 0);
        assert_eq!(
            h.notices(),
            vec!["Voice features are disabled. Enable them in settings.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_click_mode_final_transcript_auto_submits() {
        let mut h = harness(vec![Ok("It is noon.")]).await;
        h.session.toggle_listening().await;
        assert!(h.session.is_listening());
        assert_eq!(h.session.voice_status(), "Listening...");

        let follow_up = h
            .hear(RecognitionEvent::Final("What time is it?".to_string()))
            .await;

        assert_eq!(
            follow_up,
            Some(FollowUp::SubmitDraft {
                after: AUTO_SUBMIT_DELAY
            })
        );
        assert_eq!(h.session.draft(), "What time is it?");
        assert!(!h.session.is_listening());
        assert_eq!(h.recognizer.stop_count(), 1);

        let pending = h.session.submit_draft().unwrap();
        assert_eq!(h.session.draft(), "");
        let outcome = pending.run().await;
        h.session.apply_completion(outcome).await;
        assert_eq!(h.session.messages().len(), 3);

        // The stopped session's end is not a restart trigger.
        let follow_up = h.hear(RecognitionEvent::Ended).await;
        assert_eq!(follow_up, None);
    }

    #[tokio::test]
    async fn test_click_mode_fragment_waits_for_user() {
        let mut h = harness(vec![]).await;
        h.session.start_listening().await;

        let follow_up = h
            .hear(RecognitionEvent::Final("remind me to".to_string()))
            .await;

        assert_eq!(follow_up, None);
        assert_eq!(h.session.draft(), "remind me to");
    }

    #[tokio::test]
    async fn test_continuous_mode_restarts_after_end() {
        let mut h = harness(vec![]).await;
        h.session
            .set_setting("listening_mode", "continuous")
            .await
            .unwrap();
        h.session.start_listening().await;

        let final_follow_up = h
            .hear(RecognitionEvent::Final("Hello.".to_string()))
            .await;
        assert_eq!(final_follow_up, None);
        assert!(h.session.is_listening());

        let follow_up = h.hear(RecognitionEvent::Ended).await;
        assert_eq!(
            follow_up,
            Some(FollowUp::RestartListening {
                after: LISTEN_RESTART_DELAY
            })
        );

        h.session.resume_listening().await;
        assert_eq!(h.recognizer.start_count(), 2);
    }

    #[tokio::test]
    async fn test_no_listening_while_generating() {
        let mut h = harness(vec![Ok("Hi")]).await;
        let pending = h.session.send_user_message("Hello").unwrap();

        h.session.start_listening().await;
        h.session.resume_listening().await;
        assert_eq!(h.recognizer.start_count(), 0);

        h.session.apply_completion(pending.run().await).await;
        h.session.start_listening().await;
        assert_eq!(h.recognizer.start_count(), 1);
    }

    #[tokio::test]
    async fn test_listening_mode_change_stops_listening() {
        let mut h = harness(vec![]).await;
        h.session.start_listening().await;

        h.session
            .set_setting("listening_mode", "continuous")
            .await
            .unwrap();

        assert!(!h.session.is_listening());
        assert_eq!(h.recognizer.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_recognition_error_notifies() {
        let mut h = harness(vec![]).await;
        h.session.start_listening().await;
        h.drain();

        h.hear(RecognitionEvent::Error(RecognitionErrorKind::NotAllowed))
            .await;

        assert!(!h.session.is_listening());
        assert_eq!(h.notices(), vec!["Microphone permission denied".to_string()]);
    }

    #[tokio::test]
    async fn test_late_end_of_stopped_session_is_ignored() {
        let mut h = harness(vec![]).await;
        h.session.toggle_listening().await;
        let first = h.recognizer.last_session().unwrap();
        h.hear(RecognitionEvent::Final("remind me to".to_string()))
            .await;
        assert!(!h.session.is_listening());

        h.session.toggle_listening().await;
        assert!(h.session.is_listening());

        let follow_up = h.hear_from(first, RecognitionEvent::Ended).await;

        assert_eq!(follow_up, None);
        assert!(h.session.is_listening());
        assert_eq!(h.session.voice_status(), "Listening...");

        h.session.toggle_listening().await;
        assert!(!h.session.is_listening());
        assert_eq!(h.recognizer.start_count(), 2);
        assert_eq!(h.recognizer.stop_count(), 2);
    }

    #[tokio::test]
    async fn test_recognizer_start_failure_notifies() {
        let mut h = harness(vec![]).await;
        h.recognizer.fail_starts();
        h.drain();

        h.session.toggle_listening().await;

        assert!(!h.session.is_listening());
        assert_eq!(h.recognizer.start_count(), 0);
        assert_eq!(h.notices(), vec!["Failed to start voice input".to_string()]);
    }

    #[tokio::test]
    async fn test_speech_failure_notifies() {
        let mut h = harness(vec![Ok("Sure thing.")]).await;
        h.session.set_setting("auto_speak", "true").await.unwrap();
        h.session.send_and_wait("Hello").await;
        let id = h.synthesizer.spoken()[0].id;
        h.session
            .handle_voice_event(VoiceEvent::Synthesis(SynthesisEvent::Started(id)))
            .await;
        h.drain();

        let follow_up = h
            .session
            .handle_voice_event(VoiceEvent::Synthesis(SynthesisEvent::Failed(
                id,
                "audio device busy".to_string(),
            )))
            .await;

        assert_eq!(follow_up, None);
        assert!(!h.session.is_speaking());
        let events = h.drain();
        assert!(events.contains(&SessionEvent::SpeakingChanged(false)));
        assert!(events.contains(&SessionEvent::Notice {
            level: NoticeLevel::Error,
            text: "Speech output error".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_speech_finish_resumes_continuous_listening() {
        let mut h = harness(vec![Ok("Sure thing.")]).await;
        h.session.set_setting("auto_speak", "true").await.unwrap();
        h.session
            .set_setting("listening_mode", "continuous")
            .await
            .unwrap();

        h.session.send_and_wait("Hello").await;
        let id = h.synthesizer.spoken()[0].id;

        h.session
            .handle_voice_event(VoiceEvent::Synthesis(SynthesisEvent::Started(id)))
            .await;
        assert!(h.session.is_speaking());
        assert_eq!(h.session.voice_status(), "Speaking...");

        let follow_up = h
            .session
            .handle_voice_event(VoiceEvent::Synthesis(SynthesisEvent::Finished(id)))
            .await;
        assert_eq!(
            follow_up,
            Some(FollowUp::RestartListening {
                after: RESUME_AFTER_SPEECH_DELAY
            })
        );
        assert!(!h.session.is_speaking());
    }

    #[tokio::test]
    async fn test_disabling_voice_stops_speech() {
        let mut h = harness(vec![Ok("Sure.")]).await;
        h.session.set_setting("auto_speak", "true").await.unwrap();
        h.session.send_and_wait("Hello").await;
        let id = h.synthesizer.spoken()[0].id;
        h.session
            .handle_voice_event(VoiceEvent::Synthesis(SynthesisEvent::Started(id)))
            .await;

        h.session.set_setting("voice_enabled", "false").await.unwrap();

        assert!(!h.session.is_speaking());
        assert_eq!(h.synthesizer.cancel_count(), 1);
        assert_eq!(h.session.voice_status(), "Voice disabled");
    }

    #[tokio::test]
    async fn test_last_reply() {
        let mut h = harness(vec![Ok("Copy me")]).await;
        assert_eq!(h.session.last_reply(), None);
        h.session.send_and_wait("Hello").await;
        assert_eq!(h.session.last_reply().as_deref(), Some("Copy me"));
    }
}
