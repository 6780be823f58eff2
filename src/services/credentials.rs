use thiserror::Error;

use super::database::{Database, StorageError};
use super::keyring::KeyringService;

const API_KEY_KEY: &str = "api_key";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0:#}")]
    Keyring(#[from] anyhow::Error),
}

/// Where a remembered API key lives.
#[derive(Debug, Clone)]
pub enum CredentialStore {
    /// Plaintext entry in the key-value store.
    Plain(Database),
    Keyring(KeyringService),
}

impl CredentialStore {
    pub async fn load(&self) -> Result<Option<String>, CredentialError> {
        let key = match self {
            CredentialStore::Plain(db) => db.get(API_KEY_KEY).await?,
            CredentialStore::Keyring(keyring) => keyring.api_key().await?,
        };
        Ok(key.filter(|k| !k.trim().is_empty()))
    }

    pub async fn store(&self, key: &str) -> Result<(), CredentialError> {
        match self {
            CredentialStore::Plain(db) => db.set(API_KEY_KEY, key).await?,
            CredentialStore::Keyring(keyring) => keyring.store_api_key(key).await?,
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CredentialError> {
        match self {
            CredentialStore::Plain(db) => db.remove(API_KEY_KEY).await?,
            CredentialStore::Keyring(keyring) => keyring.delete_api_key().await?,
        }
        Ok(())
    }
}
