use crate::snapshot::config::{StorageBackend, StorageConfig};
use crate::twitch::config::TwitchConfig;
use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CREDENTIALS_NAME: &str = "twitch-client-credentials";
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Complete snapshotter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotterConfig {
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Where Twitch credentials are read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    /// Local encrypted SQLite store
    #[default]
    Sqlite,
    /// AWS Secrets Manager, in `storage.region` with the storage keys
    Aws,
}

/// Secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretBackend,
    /// Custom Secrets Manager endpoint (LocalStack)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// SQLite database holding the encrypted secrets
    #[serde(default = "default_secrets_database")]
    pub database: PathBuf,
    /// Name of the secret holding `client_id` / `client_secret`
    #[serde(default = "default_credentials_name")]
    pub credentials_name: String,
}

fn default_secrets_database() -> PathBuf {
    PathBuf::from("secrets.db")
}

fn default_credentials_name() -> String {
    DEFAULT_CREDENTIALS_NAME.to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::Sqlite,
            endpoint: None,
            database: default_secrets_database(),
            credentials_name: default_credentials_name(),
        }
    }
}

/// Capture-time configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// IANA timezone the capture timestamp and snapshot path are expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl CaptureConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown timezone {:?}: {}", self.timezone, e))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between runs in `schedule` mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl SnapshotterConfig {
    /// Applies deployment environment variables on top of the file values.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup("AWS_REGION") {
            self.storage.region = region;
        }
        if let Some(path) = lookup("S3_BUCKET_PATH") {
            match path.strip_prefix("s3://") {
                Some(rest) => {
                    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                    self.storage.backend = StorageBackend::S3;
                    self.storage.bucket = Some(bucket.to_string());
                    self.storage.base_path = prefix.to_string();
                }
                None => self.storage.base_path = path,
            }
        }
        if let Some(name) = lookup("TWITCH_CREDENTIALS_NAME") {
            self.secrets.credentials_name = name;
        }
        if let Some(key_id) = lookup("AWS_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(key_id);
        }
        if let Some(secret) = lookup("AWS_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(secret);
        }
        if let Some(tz) = lookup("SNAPSHOT_TIMEZONE") {
            self.capture.timezone = tz;
        }
        if let Some(db) = lookup("SNAPSHOT_SECRETS_DB") {
            self.secrets.database = PathBuf::from(db);
        }
        if let Some(backend) = lookup("SNAPSHOT_SECRETS_BACKEND") {
            match backend.to_lowercase().as_str() {
                "aws" => self.secrets.backend = SecretBackend::Aws,
                "sqlite" => self.secrets.backend = SecretBackend::Sqlite,
                other => tracing::warn!(backend = %other, "Ignoring unknown SNAPSHOT_SECRETS_BACKEND"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.capture.tz()?;

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_none() {
            bail!("storage.bucket (or an s3:// S3_BUCKET_PATH) is required for the s3 backend");
        }
        if !(1..=100).contains(&self.twitch.page_size) {
            bail!("twitch.page_size must be between 1 and 100");
        }
        if self.twitch.backoff_interval_secs == 0 {
            bail!("twitch.backoff_interval_secs must be greater than zero");
        }
        if self.twitch.backoff_interval_secs > self.twitch.backoff_ceiling_secs {
            bail!("twitch.backoff_interval_secs must not exceed twitch.backoff_ceiling_secs");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SnapshotterConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SnapshotterConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
