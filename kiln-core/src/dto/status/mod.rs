//! Job status DTOs
//!
//! The payload returned by `GET /jobs/{id}`. Pollers read it on a fixed
//! interval and stop once `status` is terminal. Errors are plain strings so
//! the shape stays stable whatever produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{Job, JobId, JobKind, JobStatus};
use crate::domain::subtask::{Subtask, SubtaskStatus};

/// Current best-known state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskView>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-subtask entry of the status payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskView {
    pub index: usize,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl From<&Subtask> for SubtaskView {
    fn from(subtask: &Subtask) -> Self {
        Self {
            index: subtask.index,
            status: subtask.status,
            result_url: subtask.result_url.clone(),
            error: subtask.error.clone(),
            score: subtask.score,
        }
    }
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        let mut subtasks: Vec<SubtaskView> = job.subtasks.iter().map(SubtaskView::from).collect();
        subtasks.sort_by_key(|s| s.index);

        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            subtasks,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

impl JobStatusView {
    /// True once the poller should stop
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn count(&self, status: SubtaskStatus) -> usize {
        self.subtasks.iter().filter(|s| s.status == status).count()
    }

    /// A completed job where some subtasks failed
    pub fn is_partial_success(&self) -> bool {
        self.status == JobStatus::Completed && self.count(SubtaskStatus::Failed) > 0
    }
}
