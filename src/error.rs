//! Error taxonomy for a snapshot run.
//!
//! Every failure inside a run surfaces as an [`IngestError`]. Only
//! [`IngestError::Transient`] is ever retried, and only inside the backoff
//! loop of the Twitch client; everything else travels up to the orchestrator
//! entry point, which turns it into a failed invocation response.

use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the source of storage failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while ingesting and persisting a snapshot.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single request failed (connection error, non-2xx status or an
    /// undecodable body). Retried by the backoff loop.
    #[error("request to {endpoint} failed: {source}")]
    Transient {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The accumulated backoff reached the ceiling without a success.
    #[error("{endpoint} hit max backoff after waiting {}s", waited.as_secs())]
    BackoffExhausted { endpoint: String, waited: Duration },

    /// Secret retrieval, snapshot encoding or object store write failed.
    #[error("storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl IngestError {
    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Renders the error followed by every underlying cause, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        chain
    }
}
