use super::parquet::Compression;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where snapshot files are written
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    /// Local directory, rooted at `root`
    Fs,
    /// Process memory, for tests and dry runs
    Memory,
}

/// Configuration for the snapshot object store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// S3 bucket name
    pub bucket: Option<String>,

    /// S3 region
    pub region: String,

    /// Custom S3 endpoint (MinIO, R2)
    pub endpoint: Option<String>,

    /// Root directory for the fs backend
    pub root: PathBuf,

    /// Key prefix every snapshot path is built under
    pub base_path: String,

    /// Static S3 credentials. When unset the ambient AWS chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    pub compression: Compression,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            bucket: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            root: PathBuf::from("./snapshots"),
            base_path: String::new(),
            access_key_id: None,
            secret_access_key: None,
            compression: Compression::Gzip,
        }
    }
}
