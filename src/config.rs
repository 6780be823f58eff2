use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::ValueEnum;

use crate::cli::CliArgs;
use crate::services::Clipboard;

pub const APP_ID: &str = "io.github.parley.Parley";
pub const DATA_DIR_NAME: &str = "parley";
pub const DATABASE_FILE: &str = "parley.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CredentialBackend {
    /// Plaintext entry in the local store.
    Plain,
    /// Desktop Secret Service.
    Keyring,
}

/// Runtime configuration, fixed for the life of the process.
#[derive(Clone)]
pub struct AppConfig {
    /// `None` keeps the store in memory.
    pub database_path: Option<PathBuf>,
    pub base_url: String,
    pub api_key: Option<String>,
    pub completion_timeout: Option<Duration>,
    pub storage_quota: Option<usize>,
    pub credentials: CredentialBackend,
    pub tts_command: Option<String>,
    pub stt_command: Option<(String, Vec<String>)>,
    pub clipboard: Option<Clipboard>,
    pub export_dir: PathBuf,
    pub color: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_path", &self.database_path)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("completion_timeout", &self.completion_timeout)
            .field("storage_quota", &self.storage_quota)
            .field("credentials", &self.credentials)
            .field("tts_command", &self.tts_command)
            .field("stt_command", &self.stt_command)
            .field("clipboard", &self.clipboard)
            .field("export_dir", &self.export_dir)
            .field("color", &self.color)
            .finish()
    }
}

impl AppConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let database_path = if args.ephemeral {
            None
        } else {
            let dir = match args.data_dir {
                Some(dir) => dir,
                None => default_data_dir(
                    std::env::var_os("XDG_DATA_HOME").as_deref().map(Path::new),
                    std::env::var_os("HOME").as_deref().map(Path::new),
                ),
            };
            Some(dir.join(DATABASE_FILE))
        };

        if args.completion_timeout_secs == Some(0) {
            bail!("--timeout must be at least one second");
        }

        Ok(Self {
            database_path,
            base_url: args.base_url,
            api_key: args.api_key.filter(|k| !k.trim().is_empty()),
            completion_timeout: args.completion_timeout_secs.map(Duration::from_secs),
            storage_quota: args.storage_quota,
            credentials: args.credentials,
            tts_command: args.tts_command.filter(|c| !c.trim().is_empty()),
            stt_command: args.stt_command.as_deref().and_then(split_command),
            clipboard: args
                .clipboard_command
                .as_deref()
                .and_then(Clipboard::from_command_line),
            export_dir: args.export_dir,
            color: !args.no_color,
        })
    }
}

/// `$XDG_DATA_HOME/parley`, else `$HOME/.local/share/parley`, else `./.parley`.
pub fn default_data_dir(xdg_data_home: Option<&Path>, home: Option<&Path>) -> PathBuf {
    match (xdg_data_home, home) {
        (Some(xdg), _) if xdg.is_absolute() => xdg.join(DATA_DIR_NAME),
        (_, Some(home)) => home.join(".local").join("share").join(DATA_DIR_NAME),
        _ => PathBuf::from(format!(".{}", DATA_DIR_NAME)),
    }
}

fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_default_data_dir() {
        assert_eq!(
            default_data_dir(Some(Path::new("/xdg")), Some(Path::new("/home/u"))),
            PathBuf::from("/xdg/parley")
        );
        assert_eq!(
            default_data_dir(Some(Path::new("relative")), Some(Path::new("/home/u"))),
            PathBuf::from("/home/u/.local/share/parley")
        );
        assert_eq!(default_data_dir(None, None), PathBuf::from(".parley"));
    }

    #[test]
    fn test_from_args() {
        let args = CliArgs::try_parse_from([
            "parley",
            "--data-dir",
            "/tmp/p",
            "--timeout",
            "20",
            "--stt-command",
            "whisper-stream --model base",
            "--clipboard-command",
            "wl-copy",
        ])
        .unwrap();
        let config = AppConfig::from_args(args).unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/p/parley.db")));
        assert_eq!(config.completion_timeout, Some(Duration::from_secs(20)));
        assert_eq!(
            config.stt_command,
            Some((
                "whisper-stream".to_string(),
                vec!["--model".to_string(), "base".to_string()]
            ))
        );
        assert_eq!(config.clipboard, Clipboard::from_command_line("wl-copy"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let args = CliArgs::try_parse_from(["parley", "--api-key", "sk-secret"]).unwrap();
        let config = AppConfig::from_args(args).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }

    #[test]
    fn test_ephemeral_and_zero_timeout() {
        let args = CliArgs::try_parse_from(["parley", "--ephemeral"]).unwrap();
        assert_eq!(AppConfig::from_args(args).unwrap().database_path, None);

        let args = CliArgs::try_parse_from(["parley", "--timeout", "0"]).unwrap();
        assert!(AppConfig::from_args(args).is_err());
    }
}
