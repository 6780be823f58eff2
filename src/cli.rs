//! Command-line arguments. Every flag also reads an environment variable, so
//! the same options can come from the shell profile.

use std::path::PathBuf;

use clap::Parser;

use crate::config::CredentialBackend;
use crate::providers::openai::DEFAULT_BASE_URL;

/// parley: a terminal chat client with optional voice input and output.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Directory holding the local store.
    #[arg(short = 'd', long = "data-dir", env = "PARLEY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep everything in memory for this run only.
    #[arg(long = "ephemeral")]
    pub ephemeral: bool,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long = "base-url", env = "PARLEY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key to use when none is remembered.
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Give up on a completion after this many seconds.
    #[arg(long = "timeout", env = "PARLEY_COMPLETION_TIMEOUT")]
    pub completion_timeout_secs: Option<u64>,

    /// Refuse writes that would grow the store past this many bytes.
    #[arg(long = "storage-quota", env = "PARLEY_STORAGE_QUOTA")]
    pub storage_quota: Option<usize>,

    /// Where a remembered API key is kept.
    #[arg(long = "credentials", env = "PARLEY_CREDENTIALS", value_enum, default_value_t = CredentialBackend::Plain)]
    pub credentials: CredentialBackend,

    /// espeak-ng compatible program for spoken replies.
    #[arg(long = "tts-command", env = "PARLEY_TTS_COMMAND")]
    pub tts_command: Option<String>,

    /// Transcription command printing one transcript per line.
    #[arg(long = "stt-command", env = "PARLEY_STT_COMMAND")]
    pub stt_command: Option<String>,

    /// Command that copies stdin to the clipboard, e.g. `wl-copy`.
    #[arg(long = "clipboard-command", env = "PARLEY_CLIPBOARD_COMMAND")]
    pub clipboard_command: Option<String>,

    /// Directory exports are written to.
    #[arg(long = "export-dir", env = "PARLEY_EXPORT_DIR", default_value = ".")]
    pub export_dir: PathBuf,

    /// Disable colored output.
    #[arg(long = "no-color", env = "NO_COLOR")]
    pub no_color: bool,
}
