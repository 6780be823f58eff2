use thiserror::Error;

use crate::services::export::ExportFormat;

/// One line of user input, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    /// Empty line: send the transcribed draft, if any.
    SubmitDraft,
    Help,
    New,
    Chats,
    /// Conversation id, or its 1-based position in the list.
    Switch(String),
    Clear,
    Regenerate,
    Export(ExportFormat),
    Copy,
    Settings,
    Set { field: String, value: String },
    Theme,
    Key { key: String, remember: bool },
    ToggleListening,
    StopListening,
    StopSpeaking,
    ResetAll { confirmed: bool },
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: /{0}. Type /help for a list.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
Type a message and press Enter to send it. Commands:
  /new                      start a new chat
  /chats                    list chats
  /switch <n|id>            open a chat from the list
  /clear                    clear the current chat
  /regen                    ask again for the last reply
  /export [json|md]         save the current chat to a file
  /copy                     copy the last reply to the clipboard
  /settings                 show settings
  /set <name> <value>       change a setting
  /theme                    switch between light and dark
  /key <api-key> [--remember]
  /voice                    start or stop listening
  /stop                     stop listening
  /hush                     stop speaking
  /reset-all confirm        erase all chats, settings and the saved key
  /quit
Start a message with // to send a literal leading slash.";

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::SubmitDraft);
    }
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(Command::Send(format!("/{}", literal)));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "help" | "?" => Command::Help,
        "new" => Command::New,
        "chats" | "list" => Command::Chats,
        "switch" | "open" => {
            if args.is_empty() {
                return Err(CommandError::Usage("/switch <n|id>"));
            }
            Command::Switch(args.to_string())
        }
        "clear" => Command::Clear,
        "regen" | "regenerate" => Command::Regenerate,
        "export" => match args {
            "" | "json" => Command::Export(ExportFormat::Json),
            "md" | "markdown" => Command::Export(ExportFormat::Markdown),
            _ => return Err(CommandError::Usage("/export [json|md]")),
        },
        "copy" => Command::Copy,
        "settings" => Command::Settings,
        "set" => {
            let Some((field, value)) = args.split_once(char::is_whitespace) else {
                return Err(CommandError::Usage("/set <name> <value>"));
            };
            Command::Set {
                field: field.to_string(),
                value: value.trim().to_string(),
            }
        }
        "theme" => Command::Theme,
        "key" => {
            let mut key = None;
            let mut remember = false;
            for part in args.split_whitespace() {
                match part {
                    "--remember" | "-r" => remember = true,
                    other if key.is_none() => key = Some(other.to_string()),
                    _ => return Err(CommandError::Usage("/key <api-key> [--remember]")),
                }
            }
            Command::Key {
                key: key.unwrap_or_default(),
                remember,
            }
        }
        "voice" | "mic" => Command::ToggleListening,
        "stop" => Command::StopListening,
        "hush" | "quiet" => Command::StopSpeaking,
        "reset-all" => Command::ResetAll {
            confirmed: args == "confirm",
        },
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}
