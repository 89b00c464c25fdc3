//! Encrypted secret storage using SQLite.
//!
//! Secrets are JSON documents addressed by name. Values are sealed with
//! AES-256-GCM before they touch the database.

use super::encryption::{self, MasterKey, Sealed};
use super::{parse_secret, CredentialSource};
use crate::error::IngestError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error};

/// Encrypted secret store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE secrets (
///     id INTEGER PRIMARY KEY,
///     name TEXT NOT NULL UNIQUE,
///     ciphertext TEXT NOT NULL,   -- AES-256-GCM, base64
///     nonce TEXT NOT NULL,        -- base64
///     created_at TEXT NOT NULL,   -- RFC 3339
///     updated_at TEXT NOT NULL    -- RFC 3339
/// );
/// ```
pub struct SecretStore {
    conn: Mutex<Connection>,
    key: MasterKey,
}

impl SecretStore {
    /// Opens (or creates) a store at `db_path`. `master_key` is the
    /// base64-encoded 32-byte key; `":memory:"` gives a throwaway store.
    pub fn new<P: AsRef<Path>>(db_path: P, master_key: &str) -> Result<Self> {
        let key = MasterKey::from_base64(master_key).context("Invalid master key")?;
        let conn = Connection::open(db_path).context("Failed to open secret database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                ciphertext TEXT NOT NULL,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create secrets table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Secret store connection lock poisoned"))
    }

    /// Stores `payload` under `name`, replacing any previous value.
    ///
    /// The payload must be a JSON object whose values are all strings, which
    /// is the shape [`CredentialSource::get_credentials`] hands out.
    pub fn put(&self, name: &str, payload: &str) -> Result<()> {
        parse_secret(payload).with_context(|| format!("Refusing to store secret {}", name))?;

        let sealed = encryption::seal(payload, &self.key).context("Failed to encrypt secret")?;
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO secrets (name, ciphertext, nonce, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(name) DO UPDATE SET
                    ciphertext = excluded.ciphertext,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at
                "#,
                params![name, sealed.ciphertext, sealed.nonce, now],
            )
            .context("Failed to store secret")?;

        Ok(())
    }

    /// Returns the decrypted payload stored under `name`, if any.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let sealed = self
            .conn()?
            .query_row(
                "SELECT ciphertext, nonce FROM secrets WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query secret")?;

        sealed
            .map(|sealed| encryption::open(&sealed, &self.key).context("Failed to decrypt secret"))
            .transpose()
    }

    /// Deletes the secret. Returns false when nothing was stored under `name`.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM secrets WHERE name = ?1", params![name])
            .context("Failed to delete secret")?;
        Ok(removed > 0)
    }

    /// Lists stored secret names in alphabetical order.
    pub fn list(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM secrets ORDER BY name")
            .context("Failed to prepare query")?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;
        Ok(names)
    }

    fn load_credentials(&self, name: &str) -> Result<HashMap<String, String>> {
        let payload = self
            .get(name)?
            .ok_or_else(|| anyhow!("Secret {} not found", name))?;
        parse_secret(&payload).with_context(|| format!("Secret {} is malformed", name))
    }
}

#[async_trait]
impl CredentialSource for SecretStore {
    async fn get_credentials(
        &self,
        secret_name: &str,
    ) -> Result<HashMap<String, String>, IngestError> {
        debug!(secret = %secret_name, "Loading secret");

        self.load_credentials(secret_name).map_err(|e| {
            error!(secret = %secret_name, error = %format!("{:#}", e), "Error retrieving secret");
            IngestError::storage(format!("failed to retrieve secret {}", secret_name), e)
        })
    }
}
