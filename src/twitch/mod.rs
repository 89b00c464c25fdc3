//! Twitch Helix ingestion: app-token authentication and paginated polling of
//! the live streams listing, each call guarded by a linear backoff.

pub mod backoff;
pub mod client;
pub mod config;

use crate::error::IngestError;
use crate::streams::StreamTable;
use async_trait::async_trait;

pub use backoff::{BackoffPolicy, CallState, Outcome, Sleeper, TokioSleeper};
pub use client::{AuthHeaders, HttpMethod, TwitchClient};
pub use config::TwitchConfig;

/// Anything that can produce the current set of live streams.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn current_streams(&self) -> Result<StreamTable, IngestError>;
}

#[async_trait]
impl StreamSource for TwitchClient {
    async fn current_streams(&self) -> Result<StreamTable, IngestError> {
        self.fetch_current_streams().await
    }
}
