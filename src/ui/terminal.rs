use chrono::{DateTime, Utc};

use crate::models::{Message, Role};
use crate::services::conversation::time_ago;
use crate::services::markdown::{self, TextStyle};
use crate::services::session::{ConversationSummary, NoticeLevel, SessionEvent};
use crate::services::settings::{Settings, Theme};

const RESET: &str = "\x1b[0m";

/// Colors for one theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub user: &'static str,
    pub assistant: &'static str,
    pub error: &'static str,
    pub notice: &'static str,
    pub text: TextStyle,
}

impl Palette {
    pub const PLAIN: Palette = Palette {
        user: "",
        assistant: "",
        error: "",
        notice: "",
        text: TextStyle::PLAIN,
    };

    pub const LIGHT: Palette = Palette {
        user: "\x1b[1;34m",
        assistant: "\x1b[1;32m",
        error: "\x1b[1;31m",
        notice: "\x1b[2m",
        text: TextStyle {
            bold: "\x1b[1m",
            italic: "\x1b[3m",
            code: "\x1b[35m",
            heading: "\x1b[1;34m",
            link: "\x1b[4;34m",
            dim: "\x1b[2m",
            reset: RESET,
        },
    };

    pub const DARK: Palette = Palette {
        user: "\x1b[1;96m",
        assistant: "\x1b[1;92m",
        error: "\x1b[1;91m",
        notice: "\x1b[90m",
        text: TextStyle {
            bold: "\x1b[1;97m",
            italic: "\x1b[3m",
            code: "\x1b[93m",
            heading: "\x1b[1;96m",
            link: "\x1b[4;96m",
            dim: "\x1b[90m",
            reset: RESET,
        },
    };

    fn reset(&self) -> &'static str {
        self.text.reset
    }
}

const EXAMPLE_PROMPTS: [&str; 4] = [
    "Explain quantum computing simply",
    "Write a Python function to sort a list",
    "What are the benefits of meditation?",
    "Help me debug my code",
];

/// Turns session events into terminal text.
pub struct Renderer {
    color: bool,
    palette: Palette,
    conversation_id: Option<String>,
    voice_status: Option<String>,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            palette: if color { Palette::LIGHT } else { Palette::PLAIN },
            conversation_id: None,
            voice_status: None,
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if self.color {
            self.palette = match theme {
                Theme::Light => Palette::LIGHT,
                Theme::Dark => Palette::DARK,
            };
        }
    }

    /// Text to print for `event`, if any.
    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        let p = self.palette;
        match event {
            SessionEvent::ConversationLoaded {
                conversation_id,
                title,
                messages,
            } => {
                self.conversation_id = Some(conversation_id.clone());
                let mut out = format!("{}── {} ──{}\n", p.notice, title, p.reset());
                if messages.is_empty() {
                    out.push_str(&self.welcome());
                } else {
                    let rendered: Vec<String> =
                        messages.iter().map(|m| self.message(m)).collect();
                    out.push_str(&rendered.join("\n\n"));
                }
                Some(out)
            }
            SessionEvent::MessageAppended {
                conversation_id,
                message,
            } => (self.conversation_id.as_ref() == Some(conversation_id))
                .then(|| self.message(message)),
            SessionEvent::GeneratingChanged(true) => {
                Some(format!("{}Thinking...{}", p.notice, p.reset()))
            }
            SessionEvent::VoiceStatus(status) => {
                if self.voice_status.as_ref() == Some(status) {
                    return None;
                }
                self.voice_status = Some(status.clone());
                Some(format!("{}[voice] {}{}", p.notice, status, p.reset()))
            }
            SessionEvent::InterimTranscript(text) => {
                Some(format!("{}[voice] \"{}\"{}", p.notice, text, p.reset()))
            }
            SessionEvent::DraftChanged(text) if !text.trim().is_empty() => Some(format!(
                "{}Heard: \"{}\" (press Enter to send){}",
                p.notice,
                text,
                p.reset()
            )),
            SessionEvent::ThemeChanged(theme) => {
                self.set_theme(*theme);
                None
            }
            SessionEvent::Notice { level, text } => Some(match level {
                NoticeLevel::Info => format!("{}* {}{}", p.notice, text, p.reset()),
                NoticeLevel::Error => format!("{}! {}{}", p.error, text, p.reset()),
            }),
            _ => None,
        }
    }

    pub fn message(&self, message: &Message) -> String {
        let p = &self.palette;
        let (label, color) = match message.role {
            Role::User => ("You", p.user),
            Role::Assistant => ("Assistant", p.assistant),
            Role::Error => ("Error", p.error),
            Role::System => ("System", p.notice),
        };
        let body = match message.role {
            Role::Assistant => markdown::render_terminal(&message.content, &p.text),
            _ => message.content.clone(),
        };
        format!("{}{}:{}\n{}", color, label, p.reset(), body)
    }

    fn welcome(&self) -> String {
        let p = &self.palette;
        let mut out = format!(
            "{}Hello! I'm your AI assistant.{}\nHere are some things you can ask me:\n",
            p.text.bold,
            p.reset()
        );
        for prompt in EXAMPLE_PROMPTS {
            out.push_str(&format!("  • {}\n", prompt));
        }
        out.trim_end().to_string()
    }

    pub fn conversation_list(&self, list: &[ConversationSummary], now: DateTime<Utc>) -> String {
        list.iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} {:>2}. {}  {}{}{}",
                    if c.active { "*" } else { " " },
                    i + 1,
                    c.title,
                    self.palette.notice,
                    time_ago(c.timestamp, now),
                    self.palette.reset()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn settings_table(settings: &Settings) -> String {
    let theme = match settings.theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
    };
    let rows = [
        ("model", settings.model.clone()),
        ("max_tokens", settings.max_tokens.to_string()),
        ("temperature", settings.temperature.to_string()),
        ("system_prompt", settings.system_prompt.clone()),
        ("theme", theme.to_string()),
        ("voice_enabled", settings.voice_enabled.to_string()),
        ("auto_speak", settings.auto_speak.to_string()),
        ("voice_rate", settings.voice_rate.to_string()),
        ("voice_pitch", settings.voice_pitch.to_string()),
        (
            "listening_mode",
            format!("{:?}", settings.listening_mode).to_lowercase(),
        ),
        ("voice_locale", settings.voice_locale.clone()),
        ("voice_name_hints", settings.voice_name_hints.join(",")),
        ("save_api_key", settings.save_api_key.to_string()),
    ];
    rows.iter()
        .map(|(name, value)| format!("  {:<16} {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}
