use crate::streams::StreamTable;
use arrow::array::{ArrayRef, RecordBatch, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use std::sync::Arc;

pub mod columns;
pub mod config;
pub mod parquet;
pub mod sink;


pub use self::columns::ColumnKind;
pub use self::config::{StorageBackend, StorageConfig};
pub use self::parquet::Compression;
pub use self::sink::{ObjectStoreSink, SnapshotSink};

/// Name of the synthetic capture-time column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Live streams captured by one run, stamped with a single capture time.
///
/// A snapshot is written once to the path derived from its capture time and
/// never modified afterwards, so it exposes no mutating methods.
#[derive(Clone, Debug)]
pub struct Snapshot {
    captured_at: DateTime<Tz>,
    table: StreamTable,
}

impl Snapshot {
    pub fn capture(table: StreamTable, captured_at: DateTime<Tz>) -> Self {
        Self { captured_at, table }
    }

    pub fn captured_at(&self) -> &DateTime<Tz> {
        &self.captured_at
    }

    pub fn table(&self) -> &StreamTable {
        &self.table
    }

    pub fn row_count(&self) -> usize {
        self.table.len()
    }

    /// Columns as written: the platform columns, then `timestamp`. A platform
    /// field that is itself called `timestamp` is shadowed by the capture time.
    pub fn columns(&self) -> Vec<&str> {
        self.data_columns()
            .chain(std::iter::once(TIMESTAMP_COLUMN))
            .collect()
    }

    fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.table
            .columns()
            .iter()
            .map(String::as_str)
            .filter(|c| *c != TIMESTAMP_COLUMN)
    }

    /// Object key for this snapshot under `base_path`.
    pub fn destination_path(&self, base_path: &str) -> String {
        snapshot_path(base_path, &self.captured_at)
    }

    /// Converts the snapshot into a single Arrow record batch.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for name in self.data_columns() {
            let kind = ColumnKind::infer(self.table.column(name));
            fields.push(Field::new(name, kind.data_type(), true));
            arrays.push(kind.build_array(self.table.column(name)));
        }

        let tz_name = self.captured_at.timezone().name();
        fields.push(Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from(tz_name))),
            false,
        ));
        let micros = self.captured_at.timestamp_micros();
        arrays.push(Arc::new(
            TimestampMicrosecondArray::from(vec![micros; self.row_count()]).with_timezone(tz_name),
        ));

        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
    }
}

/// Builds `<base>/<year>/<month>/<day>/<YYYY-MM-DD_HH-MM-SS>.parquet`.
///
/// Month and day are not zero padded in the partition directories. A trailing
/// slash on `base_path` is not doubled and an empty base yields a relative key.
pub fn snapshot_path(base_path: &str, captured_at: &DateTime<Tz>) -> String {
    let file = format!(
        "{}/{}/{}/{}.parquet",
        captured_at.year(),
        captured_at.month(),
        captured_at.day(),
        captured_at.format("%Y-%m-%d_%H-%M-%S")
    );

    match base_path.trim_end_matches('/') {
        "" => file,
        prefix => format!("{}/{}", prefix, file),
    }
}
