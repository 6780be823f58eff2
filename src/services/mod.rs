pub mod chat;
pub mod clipboard;
pub mod conversation;
pub mod credentials;
pub mod database;
pub mod export;
pub mod keyring;
pub mod markdown;
pub mod session;
pub mod settings;

pub use clipboard::Clipboard;
pub use credentials::CredentialStore;
pub use database::Database;
pub use keyring::KeyringService;
pub use session::{SessionController, SessionEvent};
