//! Backoff state machine for a single logical API call.
//!
//! ```text
//!              success
//! ATTEMPTING ──────────▶ SUCCEEDED
//!     │  ▲
//!     │  │ slept(accumulated)
//!     │  │
//!     │ BACKOFF_WAIT ◀── failure, accumulated + interval < ceiling
//!     │
//!     └────────────────▶ EXHAUSTED   failure, accumulated + interval >= ceiling
//! ```
//!
//! The wait grows linearly: with a 5s interval the client sleeps 5, 10, 15…
//! seconds between attempts. Transitions are a pure function so the loop can
//! be tested without sleeping; the actual waiting goes through [`Sleeper`].

use async_trait::async_trait;
use std::time::Duration;

/// Where a logical call currently stands. `accumulated` is the backoff
/// already incurred by this call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Attempting { accumulated: Duration },
    BackoffWait { accumulated: Duration },
    Succeeded,
    Exhausted { accumulated: Duration },
}

impl CallState {
    /// Fresh state for a new logical call.
    pub fn start() -> Self {
        Self::Attempting {
            accumulated: Duration::ZERO,
        }
    }

    /// How long to sleep before the next attempt, if waiting.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            Self::BackoffWait { accumulated } => Some(*accumulated),
            _ => None,
        }
    }
}

/// What happened since the last transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Slept,
}

/// Fixed-increment backoff with a ceiling on the accumulated wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl BackoffPolicy {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }

    /// Next state of a call. Outcomes that do not apply to the current state
    /// leave it unchanged; terminal states never move.
    pub fn transition(&self, state: CallState, outcome: Outcome) -> CallState {
        match (state, outcome) {
            (CallState::Attempting { .. }, Outcome::Success) => CallState::Succeeded,
            (CallState::Attempting { accumulated }, Outcome::Failure) => {
                let accumulated = accumulated.saturating_add(self.interval);
                if accumulated >= self.ceiling {
                    CallState::Exhausted { accumulated }
                } else {
                    CallState::BackoffWait { accumulated }
                }
            }
            (CallState::BackoffWait { accumulated }, Outcome::Slept) => {
                CallState::Attempting { accumulated }
            }
            (state, _) => state,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(super::config::BACKOFF_INTERVAL_SECS),
            Duration::from_secs(super::config::BACKOFF_CEILING_SECS),
        )
    }
}

/// Blocking wait between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
