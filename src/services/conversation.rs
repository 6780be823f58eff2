use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::conversation::{conversation_id_at, now_millis};
use crate::models::Conversation;
use crate::services::database::{Database, StorageError};

const CONVERSATIONS_KEY: &str = "conversations";

/// All conversations, keyed by id, persisted as a single blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationStore {
    conversations: BTreeMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the stored mapping verbatim. A missing or unreadable blob yields
    /// an empty store.
    pub async fn load(db: &Database) -> Self {
        match db.get(CONVERSATIONS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable conversations: {}", e);
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::error!("Failed to read conversations: {}", e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, db: &Database) -> Result<(), StorageError> {
        let json = serde_json::to_string(self)?;
        db.set(CONVERSATIONS_KEY, &json).await
    }

    /// Return the conversation with `id`, creating it with the given system
    /// prompt if it has never been seen.
    pub fn ensure(&mut self, id: &str, system_prompt: &str) -> &mut Conversation {
        let title = format!("Chat {}", self.conversations.len() + 1);
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating conversation {}", id);
                Conversation::new(id, title, system_prompt)
            })
    }

    /// A time-based id not yet used by any conversation.
    pub fn fresh_id(&self) -> String {
        let mut at = now_millis();
        loop {
            let id = conversation_id_at(at);
            if !self.conversations.contains_key(&id) {
                return id;
            }
            at += chrono::Duration::milliseconds(1);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Conversations oldest first.
    pub fn list(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}

/// Short relative age: "Now", "5m ago", "3h ago", "2d ago".
pub fn time_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - timestamp).num_seconds();
    if seconds < 60 {
        return "Now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}
