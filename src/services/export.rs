use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::models::{Conversation, Message, Role};
use crate::services::settings::SamplingSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

/// Read-only copy of a conversation for saving outside the app.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSnapshot {
    pub title: String,
    /// Creation time, ISO-8601.
    pub timestamp: String,
    pub messages: Vec<Message>,
    pub settings: SamplingSettings,
}

impl ExportSnapshot {
    pub fn new(conversation: &Conversation, settings: SamplingSettings) -> Self {
        Self {
            title: conversation.title.clone(),
            timestamp: conversation
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            messages: conversation.visible_messages().cloned().collect(),
            settings,
        }
    }

    pub fn render(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(self),
            ExportFormat::Markdown => Ok(self.to_markdown()),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut output = format!("# {}\n\n", self.title);
        output.push_str(&format!(
            "> Model: {} | Temperature: {} | Max tokens: {} | Date: {}\n\n",
            self.settings.model, self.settings.temperature, self.settings.max_tokens, self.timestamp
        ));
        output.push_str("---\n\n");

        for msg in &self.messages {
            let role_label = match msg.role {
                Role::User => "You",
                Role::Assistant => "Assistant",
                Role::Error => "Error",
                Role::System => continue,
            };
            output.push_str(&format!("### {}\n\n{}\n\n", role_label, msg.content));
        }

        output
    }
}

/// `chat-<title>-<millis>.<ext>`, with path separators in the title replaced.
pub fn file_name(title: &str, at: DateTime<Utc>, format: ExportFormat) -> String {
    let title: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
        .collect();
    format!(
        "chat-{}-{}.{}",
        title,
        at.timestamp_millis(),
        format.extension()
    )
}
