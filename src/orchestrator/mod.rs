//! One snapshot run, end to end.
//!
//! ```text
//!  now (civil tz) ──┐
//!  CredentialSource ─▶ TwitchClient::connect ─▶ fetch pages ─▶ id → stream_id
//!                                                                  │
//!                        SnapshotSink::write ◀── path ◀── Snapshot::capture
//! ```
//!
//! [`Orchestrator::handle`] is the invocation entry point: it never fails and
//! reports the outcome as an [`InvocationResponse`].

pub mod scheduler;


use crate::config::SnapshotterConfig;
use crate::credentials::CredentialSource;
use crate::error::IngestError;
use crate::snapshot::{Snapshot, SnapshotSink};
use crate::twitch::{Sleeper, StreamSource, TokioSleeper, TwitchClient, TwitchConfig};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub use scheduler::{RunStatus, SnapshotScheduler};

pub const FAILURE_BODY: &str = "Update failed, see above for error details.";

/// Per-run settings resolved from configuration.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Secret holding the Twitch app credentials
    pub credentials_name: String,
    /// Prefix every snapshot path is built under
    pub base_path: String,
    /// Civil timezone of the capture timestamp
    pub timezone: Tz,
    pub twitch: TwitchConfig,
}

impl RunSettings {
    pub fn from_config(config: &SnapshotterConfig) -> anyhow::Result<Self> {
        Ok(Self {
            credentials_name: config.secrets.credentials_name.clone(),
            base_path: config.storage.base_path.clone(),
            timezone: config.capture.tz()?,
            twitch: config.twitch.clone(),
        })
    }
}

/// Result of one invocation, shaped like a function-as-a-service response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn success(path: &str) -> Self {
        Self {
            status_code: 200,
            body: format!("File update successful: {}", path),
        }
    }

    pub fn failure() -> Self {
        Self {
            status_code: 500,
            body: FAILURE_BODY.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

pub struct Orchestrator {
    settings: RunSettings,
    credentials: Arc<dyn CredentialSource>,
    sink: Arc<dyn SnapshotSink>,
    sleeper: Arc<dyn Sleeper>,
    /// Replaces the authenticated Twitch client when set
    source: Option<Arc<dyn StreamSource>>,
}

impl Orchestrator {
    pub fn new(
        settings: RunSettings,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            settings,
            credentials,
            sink,
            sleeper: Arc::new(TokioSleeper),
            source: None,
        }
    }

    /// Replaces the sleeper used by the Twitch client's backoff.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_stream_source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Captures the current live streams and writes them as one snapshot.
    /// Returns the destination path.
    pub async fn update_streams(&self) -> Result<String, IngestError> {
        let captured_at = Utc::now().with_timezone(&self.settings.timezone);
        self.update_streams_at(captured_at).await
    }

    /// Like [`update_streams`](Self::update_streams) with a fixed capture time.
    pub async fn update_streams_at(&self, captured_at: DateTime<Tz>) -> Result<String, IngestError> {
        info!(captured_at = %captured_at, "Starting stream snapshot");

        let credentials = self
            .credentials
            .get_credentials(&self.settings.credentials_name)
            .await?;

        let mut table = match &self.source {
            Some(source) => source.current_streams().await?,
            None => {
                // Client (and its connection pool) is dropped at the end of this arm.
                let client = TwitchClient::connect(
                    &credentials,
                    self.settings.twitch.clone(),
                    Arc::clone(&self.sleeper),
                )
                .await?;
                client.current_streams().await?
            }
        };

        table.rename_column("id", "stream_id");
        let snapshot = Snapshot::capture(table, captured_at);
        let path = snapshot.destination_path(&self.settings.base_path);

        self.sink.write(&snapshot, &path).await?;

        info!(path = %path, rows = snapshot.row_count(), "Stream snapshot complete");
        Ok(path)
    }

    /// Converts a run result into an invocation response, logging failures
    /// with their full cause chain.
    pub fn respond(result: &Result<String, IngestError>) -> InvocationResponse {
        match result {
            Ok(path) => InvocationResponse::success(path),
            Err(e) => {
                for (depth, cause) in e.chain().iter().enumerate() {
                    error!(depth = depth, cause = %cause, "Update failed");
                }
                InvocationResponse::failure()
            }
        }
    }

    /// Invocation entry point. `event` and `context` are accepted for
    /// compatibility with function runtimes and ignored.
    pub async fn handle(&self, _event: &Value, _context: &Value) -> InvocationResponse {
        Self::respond(&self.update_streams().await)
    }
}
