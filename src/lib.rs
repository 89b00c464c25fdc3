// Configuration file and environment overrides
pub mod config;

// Twitch app credentials and the encrypted secret store
pub mod credentials;

// Error taxonomy shared by every stage of a run
pub mod error;

// Run orchestration, invocation entry point and scheduler
pub mod orchestrator;

// Snapshot model, Parquet encoding and object storage
pub mod snapshot;

// Tabular view of stream rows
pub mod streams;

// Twitch Helix client with backoff and pagination
pub mod twitch;

pub use config::{load_config, SnapshotterConfig};
pub use error::IngestError;
pub use orchestrator::{InvocationResponse, Orchestrator, RunSettings};
pub use snapshot::Snapshot;
pub use streams::StreamTable;
