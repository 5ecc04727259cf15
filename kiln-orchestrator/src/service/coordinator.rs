//! Pipeline coordinator
//!
//! Owns the stage state machine of every job. `submit` validates and stores
//! a job, then spawns a driver that calls `advance` until the job is
//! terminal. Each `advance` enters the next stage of the job's kind and does
//! that stage's work; calls for the same job are serialized.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use kiln_core::domain::config::{JobConfig, ValidationError};
use kiln_core::domain::job::{Job, JobId, JobStatus, TransitionError};
use kiln_core::domain::subtask::{Subtask, SubtaskStatus};
use kiln_core::dto::job::JobSummary;
use kiln_core::dto::status::JobStatusView;
use kiln_predict::{DownloadError, PredictionClient, RetryingDownloader, RunOptions};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::repository::{JobStore, StoreError};
use crate::service::stages::{
    Analyzer, ArtifactStore, Compositor, StageError, UnitPlan, artifact_name,
};
use crate::service::tracker::{SubtaskTracker, UnitContext, UnitSpec};

pub const DEFAULT_MAX_CONCURRENT_SUBTASKS: usize = 4;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid job config: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("{pending} subtasks of job {job_id} are still running")]
    SubtasksPending { job_id: JobId, pending: usize },

    #[error("analysis produced no generation units")]
    NoUnits,

    #[error("source download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: JobStatus,
        #[source]
        source: StageError,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Domain collaborators of the coordinator
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub compositor: Arc<dyn Compositor>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// Tuning of prediction runs and subtask fan-out
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub run_options: RunOptions,
    pub max_concurrent_subtasks: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            run_options: RunOptions::default(),
            max_concurrent_subtasks: DEFAULT_MAX_CONCURRENT_SUBTASKS,
        }
    }
}

/// Stage state carried between `advance` calls of one job
#[derive(Debug, Default)]
struct JobRuntime {
    source: Option<String>,
    plans: Vec<UnitPlan>,
}

struct Inner {
    collaborators: Collaborators,
    prediction: PredictionClient,
    downloader: RetryingDownloader,
    settings: CoordinatorSettings,
    runtimes: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<JobRuntime>>>>,
    driving: Mutex<HashSet<JobId>>,
}

#[derive(Clone)]
pub struct PipelineCoordinator {
    inner: Arc<Inner>,
}

impl PipelineCoordinator {
    pub fn new(
        collaborators: Collaborators,
        prediction: PredictionClient,
        downloader: RetryingDownloader,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                prediction,
                downloader,
                settings,
                runtimes: Mutex::new(HashMap::new()),
                driving: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn store(&self) -> &dyn JobStore {
        self.inner.collaborators.store.as_ref()
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Validates `config`, stores a pending job and starts driving it
    pub async fn submit(&self, config: JobConfig) -> Result<JobId, SubmitError> {
        config.validate()?;

        let job = Job::new(config);
        let job_id = job.id;
        let kind = job.kind;
        self.store().insert(job).await?;
        info!(%job_id, %kind, "Job submitted");

        let this = self.clone();
        tokio::spawn(async move { this.drive(job_id).await });

        Ok(job_id)
    }

    /// Runs the job to a terminal status. Returns immediately when another
    /// driver already owns the job.
    pub async fn drive(&self, job_id: JobId) {
        let Some(_guard) = DriveGuard::acquire(&self.inner, job_id) else {
            debug!(%job_id, "Job is already being driven");
            return;
        };

        loop {
            match self.advance(job_id).await {
                Ok(status) if status.is_terminal() => break,
                Ok(_) => continue,
                Err(CoordinatorError::NotFound(_)) => {
                    warn!(%job_id, "Job disappeared while driving");
                    break;
                }
                Err(e) => {
                    error!(%job_id, "Job failed: {}", e);
                    if let Err(e) = self.fail(job_id, e.to_string()).await {
                        error!(%job_id, "Could not record job failure: {}", e);
                    }
                    break;
                }
            }
        }

        self.inner
            .runtimes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    /// Enters the next stage and performs its work. Returns the status the
    /// job holds afterwards.
    pub async fn advance(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let runtime = self.runtime(job_id);
        let mut runtime = runtime.lock().await;

        let job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(job.status);
        }

        let profile = job.kind.profile();
        let Some(next) = profile.next_after(job.status) else {
            return Ok(job.status);
        };
        if next == JobStatus::Completed {
            return self.complete(job_id).await;
        }

        let job = self
            .store()
            .update(job_id, Box::new(move |j: &mut Job| j.enter_stage(next)))
            .await?;
        info!(%job_id, status = %next, progress = job.progress, "Entered stage");

        match next {
            JobStatus::Downloading => self.download_source(&job, &mut runtime).await?,
            JobStatus::Analyzing => self.analyze(&job, &mut runtime).await?,
            stage if stage == profile.generation => {
                self.generate(&job, std::mem::take(&mut runtime.plans)).await?
            }
            stage if Some(stage) == profile.captioning => self.caption(&job).await?,
            JobStatus::Compositing => self.composite(&job).await,
            other => debug!(%job_id, status = %other, "Stage has no work"),
        }

        let job = self
            .store()
            .update(
                job_id,
                Box::new(|j: &mut Job| {
                    j.set_stage_progress(1.0);
                    Ok(())
                }),
            )
            .await?;
        Ok(job.status)
    }

    /// Ends the job once every subtask is terminal.
    ///
    /// At least one completed subtask, or no subtasks at all, completes the
    /// job. A set where every subtask failed fails it.
    pub async fn complete(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(job.status);
        }

        if !job.all_subtasks_terminal() {
            let pending = job
                .subtasks
                .iter()
                .filter(|s| !s.status.is_terminal())
                .count();
            return Err(CoordinatorError::SubtasksPending { job_id, pending });
        }

        let total = job.subtasks.len();
        let completed = job.count_subtasks(SubtaskStatus::Completed);
        let job = self
            .store()
            .update(
                job_id,
                Box::new(move |j: &mut Job| {
                    if total > 0 && completed == 0 {
                        j.mark_failed(format!("all {} subtasks failed", total));
                    } else {
                        j.mark_completed();
                    }
                    Ok(())
                }),
            )
            .await?;

        match job.status {
            JobStatus::Completed => info!(
                %job_id,
                completed,
                failed = total - completed,
                "Job completed"
            ),
            status => warn!(%job_id, %status, error = ?job.error, "Job ended without output"),
        }
        Ok(job.status)
    }

    /// Fails the job with `reason`. A job already terminal keeps its status.
    pub async fn fail(
        &self,
        job_id: JobId,
        reason: impl Into<String>,
    ) -> Result<JobStatus, CoordinatorError> {
        let reason = reason.into();
        let job = self
            .store()
            .update(
                job_id,
                Box::new(move |j: &mut Job| {
                    j.mark_failed(reason);
                    Ok(())
                }),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) => CoordinatorError::NotFound(id),
                other => other.into(),
            })?;
        Ok(job.status)
    }

    pub async fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, StoreError> {
        Ok(self.store().get(job_id).await?.as_ref().map(JobStatusView::from))
    }

    /// Summaries of every job, newest first
    pub async fn list(&self) -> Result<Vec<JobSummary>, StoreError> {
        Ok(self
            .store()
            .list()
            .await?
            .iter()
            .map(JobSummary::from)
            .collect())
    }

    // =========================================================================
    // Stage work
    // =========================================================================

    async fn download_source(
        &self,
        job: &Job,
        runtime: &mut JobRuntime,
    ) -> Result<(), CoordinatorError> {
        let JobConfig::VideoClipping(config) = &job.config else {
            return Ok(());
        };

        let bytes = self.inner.downloader.fetch(&config.source_url).await?;
        let name = artifact_name("source", 0, &config.source_url);
        let location = self
            .inner
            .collaborators
            .artifacts
            .put(job.id, &name, bytes)
            .await
            .map_err(|source| CoordinatorError::Stage {
                stage: JobStatus::Downloading,
                source,
            })?;

        info!(job_id = %job.id, %location, "Source media stored");
        runtime.source = Some(location);
        Ok(())
    }

    async fn analyze(&self, job: &Job, runtime: &mut JobRuntime) -> Result<(), CoordinatorError> {
        let mut plans = self
            .inner
            .collaborators
            .analyzer
            .plan(job, runtime.source.as_deref())
            .await
            .map_err(|source| CoordinatorError::Stage {
                stage: JobStatus::Analyzing,
                source,
            })?;
        if plans.is_empty() {
            return Err(CoordinatorError::NoUnits);
        }

        plans.sort_by_key(|p| p.index);
        info!(job_id = %job.id, units = plans.len(), "Analysis planned units");
        runtime.plans = plans;
        Ok(())
    }

    async fn generate(&self, job: &Job, plans: Vec<UnitPlan>) -> Result<(), CoordinatorError> {
        let job_id = job.id;
        let subtasks: Vec<Subtask> = plans.iter().map(|p| p.to_subtask(job_id)).collect();
        self.store()
            .update(job_id, Box::new(move |j: &mut Job| j.attach_subtasks(subtasks)))
            .await?;

        let captions_follow = match &job.config {
            JobConfig::VideoClipping(config) => {
                config.captions && job.kind.profile().captioning.is_some()
            }
            JobConfig::ImageGeneration(_) => false,
        };
        let (success, prefix) = match job.kind.profile().captioning {
            Some(_) if captions_follow => (SubtaskStatus::Captioning, "clip"),
            Some(_) => (SubtaskStatus::Completed, "clip"),
            None => (SubtaskStatus::Completed, "image"),
        };

        let units = plans
            .into_iter()
            .map(|plan| UnitSpec {
                plan,
                start: Some(SubtaskStatus::Processing),
                success,
                artifact_prefix: prefix,
            })
            .collect();
        self.run_units(job_id, units).await
    }

    async fn caption(&self, job: &Job) -> Result<(), CoordinatorError> {
        let analyzer = &self.inner.collaborators.analyzer;
        let mut units = Vec::new();

        for subtask in job
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Captioning)
        {
            match analyzer.caption_plan(job, subtask).await {
                Ok(plan) => units.push(UnitSpec {
                    plan,
                    start: None,
                    success: SubtaskStatus::Completed,
                    artifact_prefix: "captioned",
                }),
                Err(e) => {
                    let reason = format!("caption planning failed: {}", e);
                    warn!(job_id = %job.id, index = subtask.index, "{}", reason);
                    self.store()
                        .update_subtask(
                            job.id,
                            subtask.index,
                            Box::new(move |s: &mut Subtask| s.fail(reason)),
                        )
                        .await?;
                }
            }
        }

        if units.is_empty() {
            debug!(job_id = %job.id, "No clips to caption");
            return Ok(());
        }
        self.run_units(job.id, units).await
    }

    async fn composite(&self, job: &Job) {
        let job = match self.store().get(job.id).await {
            Ok(Some(latest)) => latest,
            _ => job.clone(),
        };
        if let Err(e) = self.inner.collaborators.compositor.finalize(&job).await {
            warn!(job_id = %job.id, "Compositing failed, keeping unit artifacts: {}", e);
        }
    }

    /// Runs units through a tracker, raising stage progress as each settles
    async fn run_units(&self, job_id: JobId, units: Vec<UnitSpec>) -> Result<(), CoordinatorError> {
        let ctx = UnitContext {
            store: self.inner.collaborators.store.clone(),
            prediction: self.inner.prediction.clone(),
            downloader: self.inner.downloader.clone(),
            artifacts: self.inner.collaborators.artifacts.clone(),
            compositor: self.inner.collaborators.compositor.clone(),
            run_options: self.inner.settings.run_options.clone(),
        };
        let mut tracker = SubtaskTracker::start(
            job_id,
            units,
            ctx,
            self.inner.settings.max_concurrent_subtasks,
        );

        let total = tracker.total_count();
        while !tracker.all_terminal() {
            let Some(settled) = tracker.next_settled().await else {
                break;
            };
            let local = tracker.settled_count() as f64 / total as f64;
            debug!(
                %job_id,
                index = settled.index,
                ok = settled.outcome.is_ok(),
                settled = tracker.settled_count(),
                total,
                "Unit settled"
            );
            self.store()
                .update(
                    job_id,
                    Box::new(move |j: &mut Job| {
                        j.set_stage_progress(local);
                        Ok(())
                    }),
                )
                .await?;
        }

        info!(
            %job_id,
            completed = tracker.completed_count(),
            failed = tracker.failed_count(),
            "Units settled"
        );
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, job_id: JobId) -> Result<Job, CoordinatorError> {
        self.store()
            .get(job_id)
            .await?
            .ok_or(CoordinatorError::NotFound(job_id))
    }

    fn runtime(&self, job_id: JobId) -> Arc<tokio::sync::Mutex<JobRuntime>> {
        self.inner
            .runtimes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id)
            .or_default()
            .clone()
    }
}

/// Marks a job as driven for as long as it lives
struct DriveGuard {
    inner: Arc<Inner>,
    job_id: JobId,
}

impl DriveGuard {
    fn acquire(inner: &Arc<Inner>, job_id: JobId) -> Option<Self> {
        let mut driving = inner.driving.lock().unwrap_or_else(|e| e.into_inner());
        if !driving.insert(job_id) {
            return None;
        }
        Some(Self {
            inner: inner.clone(),
            job_id,
        })
    }
}

impl Drop for DriveGuard {
    fn drop(&mut self) {
        self.inner
            .driving
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}
