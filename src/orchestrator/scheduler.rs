//! Fixed-interval snapshot scheduler.
//!
//! Runs the orchestrator on a tokio interval from a background task and keeps
//! a status record for monitoring.

use super::{InvocationResponse, Orchestrator};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Status information for the scheduler.
#[derive(Clone, Debug, Default)]
pub struct RunStatus {
    /// Last successful run timestamp
    pub last_run: Option<DateTime<Utc>>,
    /// Destination of the last successful run
    pub last_path: Option<String>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Total number of successful runs
    pub run_count: u64,
    /// Total number of failed runs
    pub error_count: u64,
}

pub struct SnapshotScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    status: Arc<Mutex<RunStatus>>,
}

impl SnapshotScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            status: Arc::new(Mutex::new(RunStatus::default())),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<Mutex<RunStatus>> {
        Arc::clone(&self.status)
    }

    /// Runs one snapshot and records the outcome.
    pub async fn run_once(&self) -> InvocationResponse {
        let result = self.orchestrator.update_streams().await;
        let response = Orchestrator::respond(&result);

        let mut status = self.status.lock().await;
        match result {
            Ok(path) => {
                status.last_run = Some(Utc::now());
                status.last_path = Some(path);
                status.last_error = None;
                status.run_count += 1;
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                status.error_count += 1;
            }
        }

        response
    }

    /// Starts the run loop (non-blocking). The first run happens immediately.
    ///
    /// Runs never overlap. Ticks missed while a run outlasts the interval are
    /// skipped, so the next run starts on the following interval boundary
    /// rather than immediately. Abort the handle to stop.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Starting snapshot scheduler");

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                debug!("Scheduled snapshot run");

                let response = self.run_once().await;
                if response.is_success() {
                    info!(body = %response.body, "Scheduled run finished");
                } else {
                    error!(status_code = response.status_code, "Scheduled run failed");
                }
            }
        })
    }
}
