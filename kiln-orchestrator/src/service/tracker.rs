//! Subtask tracker
//!
//! Runs the units of one job stage as spawned tasks under a concurrency cap
//! and reports each one as it settles. A unit owns its subtask record: it
//! moves it to its running status, runs a prediction, rescues the artifact
//! and records the outcome. A unit that panics is recorded as failed by the
//! tracker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use kiln_core::domain::job::JobId;
use kiln_core::domain::subtask::{Subtask, SubtaskStatus};
use kiln_predict::{PollSnapshot, PredictionClient, RetryingDownloader, RunOptions};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::repository::JobStore;
use crate::service::stages::{ArtifactStore, Compositor, UnitPlan, artifact_name};

/// Result of one unit: the stored artifact location or the failure reason
pub type UnitOutcome = Result<String, String>;

/// Shared dependencies of every unit
#[derive(Clone)]
pub struct UnitContext {
    pub store: Arc<dyn JobStore>,
    pub prediction: PredictionClient,
    pub downloader: RetryingDownloader,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub compositor: Arc<dyn Compositor>,
    pub run_options: RunOptions,
}

/// One unit of work for a subtask
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub plan: UnitPlan,
    /// Status entered before the prediction starts; `None` keeps the current one
    pub start: Option<SubtaskStatus>,
    /// Status recorded on success
    pub success: SubtaskStatus,
    /// Prefix of the stored artifact name
    pub artifact_prefix: &'static str,
}

/// A unit that has reached a terminal result
#[derive(Debug, Clone, PartialEq)]
pub struct SettledUnit {
    pub index: usize,
    pub outcome: UnitOutcome,
}

pub struct SubtaskTracker {
    job_id: JobId,
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    running: FuturesUnordered<BoxFuture<'static, (usize, Result<UnitOutcome, JoinError>)>>,
    store: Arc<dyn JobStore>,
}

impl SubtaskTracker {
    /// Spawns every unit; at most `max_concurrent` run at once
    pub fn start(
        job_id: JobId,
        units: Vec<UnitSpec>,
        ctx: UnitContext,
        max_concurrent: usize,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let total = units.len();
        let running = FuturesUnordered::new();

        for unit in units {
            let index = unit.plan.index;
            let permits = semaphore.clone();
            let ctx = ctx.clone();

            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err("concurrency limiter closed".to_string()),
                };
                run_unit(job_id, unit, &ctx).await
            });

            let settled: BoxFuture<'static, _> = Box::pin(async move { (index, handle.await) });
            running.push(settled);
        }

        info!(%job_id, total, max_concurrent, "Started subtask units");

        Self {
            job_id,
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            running,
            store: ctx.store,
        }
    }

    /// Waits for the next unit to settle. `None` once every unit has.
    pub async fn next_settled(&mut self) -> Option<SettledUnit> {
        let (index, joined) = self.running.next().await?;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = if e.is_panic() {
                    "subtask unit panicked".to_string()
                } else {
                    format!("subtask unit aborted: {}", e)
                };
                warn!(job_id = %self.job_id, index, "{}", reason);
                record_failure(self.store.as_ref(), self.job_id, index, &reason).await;
                Err(reason)
            }
        };

        match &outcome {
            Ok(_) => self.completed.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };

        Some(SettledUnit { index, outcome })
    }

    /// Drains every remaining unit
    pub async fn wait_all(&mut self) -> Vec<SettledUnit> {
        let mut settled = Vec::with_capacity(self.total);
        while let Some(unit) = self.next_settled().await {
            settled.push(unit);
        }
        settled
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    pub fn settled_count(&self) -> usize {
        self.completed_count() + self.failed_count()
    }

    pub fn all_terminal(&self) -> bool {
        self.settled_count() == self.total
    }
}

// =============================================================================
// Unit execution
// =============================================================================

async fn run_unit(job_id: JobId, unit: UnitSpec, ctx: &UnitContext) -> UnitOutcome {
    let index = unit.plan.index;

    if let Some(start) = unit.start {
        if let Err(e) = ctx
            .store
            .update_subtask(
                job_id,
                index,
                Box::new(move |s: &mut Subtask| s.transition(start)),
            )
            .await
        {
            warn!(%job_id, index, "Could not start subtask: {}", e);
            return Err(e.to_string());
        }
    }

    match execute(job_id, &unit, ctx).await {
        Ok(location) => {
            let url = location.clone();
            let success = unit.success;
            match ctx
                .store
                .update_subtask(
                    job_id,
                    index,
                    Box::new(move |s: &mut Subtask| s.succeed(url, success)),
                )
                .await
            {
                Ok(_) => {
                    info!(%job_id, index, status = %success, "Subtask unit succeeded");
                    Ok(location)
                }
                Err(e) => {
                    warn!(%job_id, index, "Could not record subtask result: {}", e);
                    record_failure(ctx.store.as_ref(), job_id, index, &e.to_string()).await;
                    Err(e.to_string())
                }
            }
        }
        Err(reason) => {
            warn!(%job_id, index, "Subtask unit failed: {}", reason);
            record_failure(ctx.store.as_ref(), job_id, index, &reason).await;
            Err(reason)
        }
    }
}

/// Prediction, download, composite, persist
async fn execute(job_id: JobId, unit: &UnitSpec, ctx: &UnitContext) -> Result<String, String> {
    let index = unit.plan.index;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollSnapshot>();

    // Snapshots are written to the subtask as they arrive, starting with the
    // one sent right after submission
    let store = ctx.store.clone();
    let recorder = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            let result = store
                .update_subtask(
                    job_id,
                    index,
                    Box::new(move |s: &mut Subtask| {
                        s.prediction_id = Some(snapshot.prediction_id);
                        s.remote_status = Some(snapshot.status.to_string());
                        s.poll_count = snapshot.poll_count;
                        Ok(())
                    }),
                )
                .await;
            if let Err(e) = result {
                debug!(%job_id, index, "Dropped poll snapshot: {}", e);
            }
        }
    });

    let options = ctx
        .run_options
        .clone()
        .with_observer(move |snapshot: &PollSnapshot| {
            let _ = tx.send(snapshot.clone());
        });

    let result = ctx
        .prediction
        .run(&unit.plan.model_key, unit.plan.input.clone(), options)
        .await;
    // The observer (and its sender) is dropped with the options, so the
    // recorder finishes once it has drained the channel
    let _ = recorder.await;

    let output = result.map_err(|e| e.to_string())?;
    let url = output
        .first_url()
        .ok_or_else(|| "prediction returned no artifact URL".to_string())?;

    // Remote URLs expire, fetch right away
    let bytes = ctx.downloader.fetch(url).await.map_err(|e| e.to_string())?;
    let bytes = ctx
        .compositor
        .compose(job_id, index, bytes)
        .await
        .map_err(|e| format!("compositing failed: {}", e))?;

    let name = artifact_name(unit.artifact_prefix, index, url);
    ctx.artifacts
        .put(job_id, &name, bytes)
        .await
        .map_err(|e| format!("storing artifact failed: {}", e))
}

async fn record_failure(store: &dyn JobStore, job_id: JobId, index: usize, reason: &str) {
    let reason = reason.to_string();
    let result = store
        .update_subtask(
            job_id,
            index,
            Box::new(move |s: &mut Subtask| {
                if s.status.is_terminal() {
                    return Ok(());
                }
                s.fail(reason)
            }),
        )
        .await;
    if let Err(e) = result {
        warn!(%job_id, index, "Could not record subtask failure: {}", e);
    }
}
