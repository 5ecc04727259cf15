//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::config::JobConfig;
use crate::domain::subtask::{Subtask, SubtaskStatus};

/// Identifier of a job
pub type JobId = Uuid;

/// Generation job record
///
/// Written only by the orchestrator's coordinator; clients read it through
/// [`crate::dto::status::JobStatusView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub subtasks: Vec<Subtask>,
    pub error: Option<String>,
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Discriminator selecting the stage sequence of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ImageGeneration,
    VideoClipping,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::ImageGeneration => write!(f, "image-generation"),
            JobKind::VideoClipping => write!(f, "video-clipping"),
        }
    }
}

/// Job status
///
/// The union of every kind's stages plus the two terminal values. Which
/// stages a job actually visits is decided by its kind's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Downloading,
    Analyzing,
    Generating,
    Clipping,
    Captioning,
    Compositing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Downloading => "DOWNLOADING",
            JobStatus::Analyzing => "ANALYZING",
            JobStatus::Generating => "GENERATING",
            JobStatus::Clipping => "CLIPPING",
            JobStatus::Captioning => "CAPTIONING",
            JobStatus::Compositing => "COMPOSITING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change on a job or subtask
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already terminal ({0})")]
    Terminal(JobStatus),

    #[error("cannot move job from {from} to {to}")]
    NotForward { from: JobStatus, to: JobStatus },

    #[error("subtasks were already created for this job")]
    SubtasksAlreadyCreated,

    #[error("cannot move subtask from {from} to {to}")]
    Subtask {
        from: SubtaskStatus,
        to: SubtaskStatus,
    },
}

impl Job {
    /// Creates a new pending job from a validated config
    pub fn new(config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: config.kind(),
            status: JobStatus::Pending,
            progress: 0,
            subtasks: Vec::new(),
            error: None,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job forward to a non-terminal stage of its kind.
    ///
    /// Progress jumps to the stage's base value unless it is already higher.
    pub fn enter_stage(&mut self, stage: JobStatus) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        let profile = self.kind.profile();
        if stage.is_terminal() || !profile.is_forward(self.status, stage) {
            return Err(TransitionError::NotForward {
                from: self.status,
                to: stage,
            });
        }

        if self.status == JobStatus::Pending && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = stage;
        self.set_progress(profile.progress_for(stage, 0.0));
        Ok(())
    }

    /// Raises progress; lower values and writes after termination are ignored
    pub fn set_progress(&mut self, value: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(value.min(100));
    }

    /// Sets progress from the current stage's local completion in `[0, 1]`
    pub fn set_stage_progress(&mut self, local: f64) {
        let value = self.kind.profile().progress_for(self.status, local);
        self.set_progress(value);
    }

    /// Installs the subtask set. Allowed once, while in the generation stage.
    pub fn attach_subtasks(&mut self, subtasks: Vec<Subtask>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if !self.subtasks.is_empty() {
            return Err(TransitionError::SubtasksAlreadyCreated);
        }
        self.subtasks = subtasks;
        Ok(())
    }

    /// Enters `Completed`. Returns false when the job was already terminal.
    pub fn mark_completed(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.progress = 100;
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Enters `Failed` with a reason. Returns false when the job was already terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = JobStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn count_subtasks(&self, status: SubtaskStatus) -> usize {
        self.subtasks.iter().filter(|s| s.status == status).count()
    }

    /// True when every subtask (if any) reached a terminal status
    pub fn all_subtasks_terminal(&self) -> bool {
        self.subtasks.iter().all(|s| s.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{ImageGenerationConfig, VideoClippingConfig};

    fn image_job() -> Job {
        Job::new(JobConfig::ImageGeneration(ImageGenerationConfig::new(
            "a lighthouse at dusk",
            2,
        )))
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = image_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.kind, JobKind::ImageGeneration);
        assert_eq!(job.progress, 0);
        assert!(job.subtasks.is_empty());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_enter_stage_forward_only() {
        let mut job = image_job();
        job.enter_stage(JobStatus::Analyzing).unwrap();
        assert!(job.started_at.is_some());
        job.enter_stage(JobStatus::Generating).unwrap();
        assert_eq!(job.progress, 10);

        let err = job.enter_stage(JobStatus::Analyzing).unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotForward {
                from: JobStatus::Generating,
                to: JobStatus::Analyzing
            }
        );
        // Stages of another kind are rejected
        assert!(job.enter_stage(JobStatus::Clipping).is_err());
        // Terminal statuses go through mark_completed / mark_failed
        assert!(job.enter_stage(JobStatus::Completed).is_err());
    }

    #[test]
    fn test_started_at_set_once() {
        let mut job = image_job();
        job.enter_stage(JobStatus::Analyzing).unwrap();
        let started = job.started_at;
        job.enter_stage(JobStatus::Generating).unwrap();
        assert_eq!(job.started_at, started);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = image_job();
        job.enter_stage(JobStatus::Analyzing).unwrap();
        job.enter_stage(JobStatus::Generating).unwrap();
        job.set_stage_progress(0.5);
        assert_eq!(job.progress, 50);
        job.set_stage_progress(0.25);
        assert_eq!(job.progress, 50);
        job.set_progress(3);
        assert_eq!(job.progress, 50);
    }

    #[test]
    fn test_terminal_is_idempotent() {
        let mut job = image_job();
        assert!(job.mark_failed("analysis failed"));
        let completed_at = job.completed_at;
        assert!(!job.mark_failed("again"));
        assert!(!job.mark_completed());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("analysis failed"));
        assert_eq!(job.completed_at, completed_at);
        assert!(job.enter_stage(JobStatus::Analyzing).is_err());
    }

    #[test]
    fn test_mark_completed_sets_full_progress() {
        let mut job = Job::new(JobConfig::VideoClipping(VideoClippingConfig::new(
            "https://example.com/v.mp4",
            2,
        )));
        job.enter_stage(JobStatus::Downloading).unwrap();
        assert!(job.mark_completed());
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_attach_subtasks_once() {
        let mut job = image_job();
        let subtasks = vec![Subtask::new(job.id, 0), Subtask::new(job.id, 1)];
        job.attach_subtasks(subtasks.clone()).unwrap();
        assert_eq!(
            job.attach_subtasks(subtasks),
            Err(TransitionError::SubtasksAlreadyCreated)
        );
        assert_eq!(job.subtasks.len(), 2);
        assert!(!job.all_subtasks_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Compositing).unwrap();
        assert_eq!(json, "\"COMPOSITING\"");
        let kind = serde_json::to_string(&JobKind::VideoClipping).unwrap();
        assert_eq!(kind, "\"video-clipping\"");
    }
}
