use std::sync::Arc;

use anyhow::{Context, Result};
use oo7::Keyring;

use crate::config::APP_ID;

const KEYRING_ATTR_APP: &str = "application";
const KEYRING_ATTR_REF: &str = "key-ref";
const API_KEY_REF: &str = "api-key";

/// The completion API key, kept in the desktop Secret Service.
#[derive(Debug, Clone)]
pub struct KeyringService {
    keyring: Arc<Keyring>,
}

impl KeyringService {
    pub async fn new() -> Result<Self> {
        let keyring = Keyring::new()
            .await
            .context("Failed to initialize keyring")?;
        Ok(Self {
            keyring: Arc::new(keyring),
        })
    }

    pub async fn store_api_key(&self, secret: &str) -> Result<()> {
        self.keyring
            .create_item("Parley API Key", &Self::attributes(), secret, true)
            .await
            .context("Failed to store API key in keyring")?;
        Ok(())
    }

    pub async fn api_key(&self) -> Result<Option<String>> {
        let items = self
            .keyring
            .search_items(&Self::attributes())
            .await
            .context("Failed to search keyring")?;

        let Some(item) = items.first() else {
            return Ok(None);
        };
        let secret = item.secret().await.context("Failed to read API key")?;
        let key = String::from_utf8(secret.to_vec()).context("API key is not valid UTF-8")?;
        Ok(Some(key))
    }

    pub async fn delete_api_key(&self) -> Result<()> {
        self.keyring
            .delete(&Self::attributes())
            .await
            .context("Failed to delete API key from keyring")?;
        Ok(())
    }

    fn attributes() -> Vec<(&'static str, &'static str)> {
        vec![(KEYRING_ATTR_APP, APP_ID), (KEYRING_ATTR_REF, API_KEY_REF)]
    }
}
