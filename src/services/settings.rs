use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::database::{Database, StorageError};

const SETTINGS_KEY: &str = "chat_settings";

/// User preferences. Every field has a default so partially stored blobs
/// load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
    pub theme: Theme,
    pub save_api_key: bool,
    pub voice_enabled: bool,
    pub auto_speak: bool,
    pub voice_rate: f32,
    pub voice_pitch: f32,
    pub listening_mode: ListeningMode,
    /// Preferred recognition and synthesis locale.
    pub voice_locale: String,
    /// Substrings matched case-insensitively against voice names.
    pub voice_name_hints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningMode {
    /// One utterance per activation.
    Click,
    /// Keep listening, resuming after each reply.
    Continuous,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            system_prompt: "You are a helpful assistant.".to_string(),
            theme: Theme::Light,
            save_api_key: false,
            voice_enabled: true,
            auto_speak: true,
            voice_rate: 1.0,
            voice_pitch: 1.0,
            listening_mode: ListeningMode::Click,
            voice_locale: "en-IN".to_string(),
            voice_name_hints: vec![
                "indian".to_string(),
                "ravi".to_string(),
                "neel".to_string(),
            ],
        }
    }
}

/// Model and generation parameters in effect for a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl Settings {
    pub fn sampling(&self) -> SamplingSettings {
        SamplingSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Set one field from its textual form, as typed on the command line.
    pub fn apply_field(&mut self, field: &str, value: &str) -> Result<(), SettingsError> {
        let value = value.trim();
        match field {
            "model" => {
                if value.is_empty() {
                    return Err(invalid("model", value));
                }
                self.model = value.to_string();
            }
            "max_tokens" => {
                self.max_tokens = value
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("max_tokens", value))?;
            }
            "temperature" => {
                self.temperature =
                    parse_ranged(value, 0.0, 2.0).ok_or_else(|| invalid("temperature", value))?;
            }
            "system_prompt" => self.system_prompt = value.to_string(),
            "theme" => {
                self.theme = match value {
                    "light" => Theme::Light,
                    "dark" => Theme::Dark,
                    _ => return Err(invalid("theme", value)),
                };
            }
            "voice_enabled" => {
                self.voice_enabled =
                    parse_bool(value).ok_or_else(|| invalid("voice_enabled", value))?;
            }
            "auto_speak" => {
                self.auto_speak = parse_bool(value).ok_or_else(|| invalid("auto_speak", value))?;
            }
            "voice_rate" => {
                self.voice_rate =
                    parse_ranged(value, 0.5, 2.0).ok_or_else(|| invalid("voice_rate", value))?;
            }
            "voice_pitch" => {
                self.voice_pitch =
                    parse_ranged(value, 0.5, 2.0).ok_or_else(|| invalid("voice_pitch", value))?;
            }
            "listening_mode" => {
                self.listening_mode = match value {
                    "click" => ListeningMode::Click,
                    "continuous" => ListeningMode::Continuous,
                    _ => return Err(invalid("listening_mode", value)),
                };
            }
            "voice_locale" => self.voice_locale = value.to_string(),
            "voice_name_hints" => {
                self.voice_name_hints = value
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            other => return Err(SettingsError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: &str) -> SettingsError {
    SettingsError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_ranged(value: &str, min: f32, max: f32) -> Option<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

pub struct SettingsService;

impl SettingsService {
    /// Load stored settings merged over defaults. Unreadable blobs fall back
    /// to defaults entirely.
    pub async fn load(db: &Database) -> Settings {
        match db.get(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                Settings::default()
            }),
            Ok(None) => Settings::default(),
            Err(e) => {
                tracing::error!("Failed to read settings: {}", e);
                Settings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &Settings) -> Result<(), StorageError> {
        let json = serde_json::to_string(settings)?;
        db.set(SETTINGS_KEY, &json).await
    }
}
