//! Credential provider for the Twitch API.
//!
//! A run asks a [`CredentialSource`] for the mapping stored under a secret
//! name (by default `twitch-client-credentials`). The mapping must carry at
//! least `client_id` and `client_secret`.
//!
//! Two sources are provided:
//! - [`SecretStore`]: named JSON secrets encrypted with AES-256-GCM and kept
//!   in SQLite.
//! - [`SecretsManagerSource`]: secrets read from AWS Secrets Manager.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  SecretStore                 │
//! │  - put / get / delete / list │
//! └──────────────────────────────┘
//!        ↓ seal        ↑ open
//! ┌──────────────────────────────┐
//! │  AES-256-GCM, nonce per put  │
//! └──────────────────────────────┘
//!        ↓             ↑
//! ┌──────────────────────────────┐
//! │  SQLite `secrets` table      │
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use twitch_snapshot::credentials::{CredentialSource, SecretStore};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let key = std::env::var("SNAPSHOT_ENCRYPTION_KEY")?;
//! let store = SecretStore::new("secrets.db", &key)?;
//! store.put(
//!     "twitch-client-credentials",
//!     r#"{"client_id":"...","client_secret":"..."}"#,
//! )?;
//!
//! let creds = store.get_credentials("twitch-client-credentials").await?;
//! assert!(creds.contains_key("client_id"));
//! # Ok(())
//! # }
//! ```

use crate::error::IngestError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

mod aws;
mod encryption;
mod storage;

pub use aws::SecretsManagerSource;
pub use storage::SecretStore;

/// Name of the environment variable holding the store's master key.
pub const MASTER_KEY_ENV: &str = "SNAPSHOT_ENCRYPTION_KEY";

/// Source of API credentials for a run.
///
/// Failures are fatal for the run: implementations log the cause and return
/// [`IngestError::Storage`] without attempting recovery.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_credentials(
        &self,
        secret_name: &str,
    ) -> std::result::Result<HashMap<String, String>, IngestError>;
}

/// Parses a secret payload into the string mapping handed to callers.
fn parse_secret(payload: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(payload).context("Secret must be a JSON object of string values")
}
