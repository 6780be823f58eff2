use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, Role};

/// Conversation selected when nothing else has been chosen.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Creation time, stored as unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Conversation {
    /// A fresh conversation holding only the system prompt.
    pub fn new(id: impl Into<String>, title: impl Into<String>, system_prompt: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: vec![Message::system(system_prompt)],
            timestamp: now_millis(),
        }
    }

    /// Replace the leading system message in place, inserting one if the
    /// list does not start with a system message.
    pub fn set_system_prompt(&mut self, prompt: &str) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = prompt.to_string(),
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    /// Drop every turn, leaving the system prompt alone in the list.
    pub fn reset(&mut self, system_prompt: &str) {
        self.messages = vec![Message::system(system_prompt)];
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages shown to the user: everything except system turns.
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Remove the closing user/assistant exchange and return its user turn.
    /// The list is left alone unless it ends with exactly that pair.
    pub fn pop_exchange(&mut self) -> Option<Message> {
        let [.., question, answer] = self.messages.as_slice() else {
            return None;
        };
        if question.role != Role::User || answer.role != Role::Assistant {
            return None;
        }
        self.messages.pop();
        self.messages.pop()
    }

    pub fn last_message(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }
}

/// Identifier for an explicitly created conversation.
pub fn conversation_id_at(at: DateTime<Utc>) -> String {
    format!("chat-{}", at.timestamp_millis())
}

/// Current time truncated to the precision conversations are stored with.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
