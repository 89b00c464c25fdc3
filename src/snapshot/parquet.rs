//! Parquet encoding of snapshots.

use super::Snapshot;
use parquet::arrow::ArrowWriter;
use parquet::basic::GzipLevel;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

/// Page compression codec for snapshot files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Snappy,
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn to_parquet(self) -> parquet::basic::Compression {
        match self {
            Self::None => parquet::basic::Compression::UNCOMPRESSED,
            Self::Snappy => parquet::basic::Compression::SNAPPY,
            Self::Gzip => parquet::basic::Compression::GZIP(GzipLevel::default()),
            Self::Zstd => parquet::basic::Compression::ZSTD(Default::default()),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "uncompressed" => Some(Self::None),
            "snappy" => Some(Self::Snappy),
            "gzip" => Some(Self::Gzip),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Encodes a snapshot as a complete Parquet file held in memory.
///
/// Object stores take whole objects, so the file is built in a buffer rather
/// than streamed to disk.
pub fn encode(snapshot: &Snapshot, compression: Compression) -> Result<Vec<u8>, ParquetError> {
    let batch = snapshot.to_record_batch()?;
    let props = WriterProperties::builder()
        .set_compression(compression.to_parquet())
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}
