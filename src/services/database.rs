use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::task;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded: {required} bytes needed, {quota} allowed")]
    QuotaExceeded { required: usize, quota: usize },

    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] task::JoinError),

    #[error("Storage connection lock poisoned")]
    Poisoned,
}

/// Opaque key-value store backed by SQLite.
///
/// Values are whole serialized blobs; callers own their encoding. An optional
/// byte quota bounds the total size of all keys and values.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    quota: Option<usize>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
            quota: None,
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (used for testing and ephemeral sessions)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
            quota: None,
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn with_quota(mut self, quota: Option<usize>) -> Self {
        self.quota = quota;
        self
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
        conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = Self::lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
        .await?
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let quota = self.quota;
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;

            if let Some(quota) = quota {
                let others: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                     FROM kv WHERE key != ?1",
                    params![key],
                    |row| row.get(0),
                )?;
                let required = others.max(0) as usize + key.len() + value.len();
                if required > quota {
                    return Err(StorageError::QuotaExceeded { required, quota });
                }
            }

            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await?
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            conn.execute("DELETE FROM kv", [])?;
            Ok(())
        })
        .await?
    }
}
