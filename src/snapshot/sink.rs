//! Snapshot persistence.
//!
//! [`ObjectStoreSink`] encodes a snapshot to Parquet and writes it as a single
//! object through OpenDAL, so the same code path serves S3, a local directory
//! and an in-memory store.

use super::config::{StorageBackend, StorageConfig};
use super::parquet::{self, Compression};
use super::Snapshot;
use crate::error::IngestError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use opendal::{services, ErrorKind, Operator};
use tracing::{error, info};

/// Destination for encoded snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Writes `snapshot` to `destination`. Fails if an object already exists
    /// there; snapshots are never overwritten.
    async fn write(&self, snapshot: &Snapshot, destination: &str) -> Result<(), IngestError>;
}

pub struct ObjectStoreSink {
    operator: Operator,
    compression: Compression,
}

impl ObjectStoreSink {
    pub fn new(operator: Operator, compression: Compression) -> Self {
        Self {
            operator,
            compression,
        }
    }

    /// Builds the operator for the configured backend.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let operator = match config.backend {
            StorageBackend::S3 => {
                let bucket = config
                    .bucket
                    .as_deref()
                    .ok_or_else(|| anyhow!("storage.bucket is required for the s3 backend"))?;

                let mut builder = services::S3::default().bucket(bucket).region(&config.region);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let (Some(key_id), Some(secret)) =
                    (&config.access_key_id, &config.secret_access_key)
                {
                    builder = builder.access_key_id(key_id).secret_access_key(secret);
                }

                Operator::new(builder)
                    .context("Failed to configure S3 storage")?
                    .finish()
            }
            StorageBackend::Fs => {
                let root = config
                    .root
                    .to_str()
                    .ok_or_else(|| anyhow!("storage.root is not valid UTF-8"))?;

                Operator::new(services::Fs::default().root(root))
                    .context("Failed to configure filesystem storage")?
                    .finish()
            }
            StorageBackend::Memory => Operator::new(services::Memory::default())
                .context("Failed to configure memory storage")?
                .finish(),
        };

        Ok(Self::new(operator, config.compression))
    }

    /// In-memory sink, mostly for tests.
    pub fn memory() -> Result<Self> {
        Self::from_config(&StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        })
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Creates the object, refusing to replace an existing one. Backends
    /// without conditional writes get an existence check first.
    async fn write_new(&self, destination: &str, bytes: Vec<u8>) -> Result<(), IngestError> {
        let write_failed = |e: opendal::Error| {
            if e.kind() == ErrorKind::ConditionNotMatch {
                IngestError::storage(format!("snapshot {} already exists", destination), e)
            } else {
                IngestError::storage(format!("failed to write {}", destination), e)
            }
        };

        if self.operator.info().full_capability().write_with_if_not_exists {
            self.operator
                .write_with(destination, bytes)
                .if_not_exists(true)
                .await
                .map_err(write_failed)?;
            return Ok(());
        }

        let exists = self
            .operator
            .exists(destination)
            .await
            .map_err(|e| IngestError::storage(format!("failed to stat {}", destination), e))?;
        if exists {
            return Err(IngestError::storage(
                format!("snapshot {} already exists", destination),
                "refusing to overwrite an existing snapshot",
            ));
        }

        self.operator
            .write(destination, bytes)
            .await
            .map_err(write_failed)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotSink for ObjectStoreSink {
    async fn write(&self, snapshot: &Snapshot, destination: &str) -> Result<(), IngestError> {
        let bytes = parquet::encode(snapshot, self.compression).map_err(|e| {
            error!(error = %e, "Failed to encode snapshot");
            IngestError::storage("failed to encode snapshot as parquet", e)
        })?;
        let size = bytes.len();

        self.write_new(destination, bytes)
            .await
            .inspect_err(|e| error!(path = %destination, error = %e, "Failed to write snapshot"))?;

        info!(
            path = %destination,
            rows = snapshot.row_count(),
            bytes = size,
            "Snapshot written"
        );
        Ok(())
    }
}
