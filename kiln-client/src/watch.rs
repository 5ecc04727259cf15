//! Job status watcher
//!
//! Polls `GET /jobs/{id}` on a fixed interval and publishes every status on
//! a `tokio::sync::watch` channel. The watcher stops by itself once the job
//! is terminal. Stopping it early through its [`CancellationToken`] only
//! detaches the watcher; the job keeps running on the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_core::dto::status::JobStatusView;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(3_000);
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Where a watcher reads job status from
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: Uuid) -> Result<JobStatusView>;
}

#[async_trait]
impl StatusSource for OrchestratorClient {
    async fn fetch_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        self.get_job_status(job_id).await
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Fetch failures tolerated in a row before the watcher gives up
    pub max_consecutive_errors: u32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WATCH_INTERVAL,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("gave up after {attempts} consecutive status errors: {last_error}")]
    TooManyErrors { attempts: u32, last_error: String },

    #[error("watcher task ended unexpectedly: {0}")]
    Aborted(String),
}

/// How a watcher ended
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The job reached a terminal status
    Finished(JobStatusView),
    /// The watcher was stopped; carries the last status seen, if any
    Stopped(Option<JobStatusView>),
}

pub struct JobWatcher {
    job_id: Uuid,
    cancel: CancellationToken,
    updates: watch::Receiver<Option<JobStatusView>>,
    handle: JoinHandle<std::result::Result<WatchOutcome, WatchError>>,
}

impl JobWatcher {
    /// Starts polling `job_id` right away, then every `options.interval`
    pub fn spawn(source: Arc<dyn StatusSource>, job_id: Uuid, options: WatchOptions) -> Self {
        let cancel = CancellationToken::new();
        let (tx, updates) = watch::channel(None);

        let token = cancel.clone();
        let handle = tokio::spawn(async move { poll_loop(source, job_id, options, tx, token).await });

        Self {
            job_id,
            cancel,
            updates,
            handle,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// A new receiver of status updates; `None` until the first fetch lands
    pub fn subscribe(&self) -> watch::Receiver<Option<JobStatusView>> {
        self.updates.clone()
    }

    /// Most recent status seen
    pub fn latest(&self) -> Option<JobStatusView> {
        self.updates.borrow().clone()
    }

    /// Token that stops this watcher when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops watching. The job itself is not affected.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits for the watcher to end
    pub async fn wait(self) -> std::result::Result<WatchOutcome, WatchError> {
        self.handle
            .await
            .map_err(|e| WatchError::Aborted(e.to_string()))?
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    job_id: Uuid,
    options: WatchOptions,
    tx: watch::Sender<Option<JobStatusView>>,
    cancel: CancellationToken,
) -> std::result::Result<WatchOutcome, WatchError> {
    let mut consecutive_errors = 0u32;

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(%job_id, "Stopped watching job");
                return Ok(WatchOutcome::Stopped(tx.borrow().clone()));
            }
            result = source.fetch_status(job_id) => result,
        };

        match fetched {
            Ok(view) => {
                consecutive_errors = 0;
                let terminal = view.is_terminal();
                tracing::debug!(%job_id, status = %view.status, progress = view.progress, "Job status");
                tx.send_replace(Some(view.clone()));
                if terminal {
                    return Ok(WatchOutcome::Finished(view));
                }
            }
            Err(e) if e.is_not_found() => return Err(WatchError::NotFound(job_id)),
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(
                    %job_id,
                    attempt = consecutive_errors,
                    "Failed to fetch job status: {}",
                    e
                );
                if consecutive_errors >= options.max_consecutive_errors.max(1) {
                    return Err(WatchError::TooManyErrors {
                        attempts: consecutive_errors,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(%job_id, "Stopped watching job");
                return Ok(WatchOutcome::Stopped(tx.borrow().clone()));
            }
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}
