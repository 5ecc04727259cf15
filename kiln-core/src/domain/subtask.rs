//! Subtask domain types
//!
//! A subtask is one independently generated unit of a job: one image variant
//! or one video clip. Each record is written only by the unit executing it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobId, TransitionError};

/// Metadata key holding the artifact of a unit that failed in a later pass
pub const INTERMEDIATE_URL_KEY: &str = "intermediateUrl";

/// Subtask execution status
///
/// `Pending -> Processing -> (Captioning) -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Processing,
    Captioning,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            SubtaskStatus::Pending => 0,
            SubtaskStatus::Processing => 1,
            SubtaskStatus::Captioning => 2,
            SubtaskStatus::Completed | SubtaskStatus::Failed => 3,
        }
    }

    /// Whether moving to `next` keeps the lifecycle strictly forward
    pub fn can_transition_to(&self, next: SubtaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SubtaskStatus::Failed => true,
            SubtaskStatus::Completed => {
                matches!(self, SubtaskStatus::Processing | SubtaskStatus::Captioning)
            }
            other => other.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubtaskStatus::Pending => "PENDING",
            SubtaskStatus::Processing => "PROCESSING",
            SubtaskStatus::Captioning => "CAPTIONING",
            SubtaskStatus::Completed => "COMPLETED",
            SubtaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One generation unit of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub job_id: JobId,
    pub index: usize,
    pub status: SubtaskStatus,
    /// Latest remote prediction submitted for this unit
    pub prediction_id: Option<String>,
    pub result_url: Option<String>,
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Remote status seen on the most recent poll
    pub remote_status: Option<String>,
    #[serde(default)]
    pub poll_count: u32,
    pub error: Option<String>,
}

impl Subtask {
    pub fn new(job_id: JobId, index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            index,
            status: SubtaskStatus::Pending,
            prediction_id: None,
            result_url: None,
            score: None,
            metadata: serde_json::Value::Null,
            remote_status: None,
            poll_count: 0,
            error: None,
        }
    }

    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Moves to a non-terminal-preserving next status
    pub fn transition(&mut self, next: SubtaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Subtask {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a successful artifact, either finishing the unit or parking it
    /// in `Captioning` when a caption pass follows.
    pub fn succeed(
        &mut self,
        result_url: impl Into<String>,
        next: SubtaskStatus,
    ) -> Result<(), TransitionError> {
        self.transition(next)?;
        self.result_url = Some(result_url.into());
        Ok(())
    }

    /// Marks the unit failed. `result_url` only ever holds a finished
    /// artifact, so an intermediate one (a clip whose caption pass failed)
    /// moves to `metadata.intermediateUrl`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SubtaskStatus::Failed)?;
        self.error = Some(reason.into());
        if let Some(url) = self.result_url.take() {
            if self.metadata.is_null() {
                self.metadata = serde_json::Value::Object(Default::default());
            }
            if let Some(map) = self.metadata.as_object_mut() {
                map.insert(INTERMEDIATE_URL_KEY.to_string(), url.into());
            }
        }
        Ok(())
    }
}
