//! Stage profiles
//!
//! Every job kind runs through its own ordered list of stages. A profile
//! describes that order, which stage fans out into subtasks, and how much of
//! the overall progress bar each stage owns.

use crate::domain::job::{JobKind, JobStatus};

/// One stage of a kind's sequence with its share of the progress bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub status: JobStatus,
    /// Progress value when the stage is entered
    pub base: u8,
    /// Progress points earned by finishing the stage
    pub weight: u8,
}

/// Ordered stage sequence for one job kind
#[derive(Debug)]
pub struct KindProfile {
    /// Non-terminal stages after `Pending`, in execution order
    pub stages: &'static [StageSpec],
    /// The stage that creates the subtask set
    pub generation: JobStatus,
    /// Stage that runs a second, per-subtask caption unit
    pub captioning: Option<JobStatus>,
}

static IMAGE_GENERATION: KindProfile = KindProfile {
    stages: &[
        StageSpec {
            status: JobStatus::Analyzing,
            base: 0,
            weight: 10,
        },
        StageSpec {
            status: JobStatus::Generating,
            base: 10,
            weight: 80,
        },
        StageSpec {
            status: JobStatus::Compositing,
            base: 90,
            weight: 10,
        },
    ],
    generation: JobStatus::Generating,
    captioning: None,
};

static VIDEO_CLIPPING: KindProfile = KindProfile {
    stages: &[
        StageSpec {
            status: JobStatus::Downloading,
            base: 0,
            weight: 15,
        },
        StageSpec {
            status: JobStatus::Analyzing,
            base: 15,
            weight: 10,
        },
        StageSpec {
            status: JobStatus::Clipping,
            base: 25,
            weight: 50,
        },
        StageSpec {
            status: JobStatus::Captioning,
            base: 75,
            weight: 25,
        },
    ],
    generation: JobStatus::Clipping,
    captioning: Some(JobStatus::Captioning),
};

impl JobKind {
    /// Returns the stage profile for this kind
    pub fn profile(&self) -> &'static KindProfile {
        match self {
            JobKind::ImageGeneration => &IMAGE_GENERATION,
            JobKind::VideoClipping => &VIDEO_CLIPPING,
        }
    }
}

impl KindProfile {
    /// Position of a status in this profile's order.
    ///
    /// `Pending` is 0, the stages follow, `Completed` is last. `Failed` and
    /// stages that belong to other kinds have no position.
    pub fn position(&self, status: JobStatus) -> Option<usize> {
        match status {
            JobStatus::Pending => Some(0),
            JobStatus::Completed => Some(self.stages.len() + 1),
            JobStatus::Failed => None,
            other => self
                .stages
                .iter()
                .position(|s| s.status == other)
                .map(|i| i + 1),
        }
    }

    /// The status that follows `current`, or `None` once terminal
    pub fn next_after(&self, current: JobStatus) -> Option<JobStatus> {
        if current.is_terminal() {
            return None;
        }
        let pos = self.position(current)?;
        Some(
            self.stages
                .get(pos)
                .map(|s| s.status)
                .unwrap_or(JobStatus::Completed),
        )
    }

    /// Looks up the spec of a non-terminal stage
    pub fn spec(&self, status: JobStatus) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.status == status)
    }

    /// Whether `from -> to` is a legal transition for this kind
    pub fn is_forward(&self, from: JobStatus, to: JobStatus) -> bool {
        if from.is_terminal() {
            return false;
        }
        if to == JobStatus::Failed {
            return true;
        }
        match (self.position(from), self.position(to)) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        }
    }

    /// Job-level progress for a stage given its local completion in `[0, 1]`
    pub fn progress_for(&self, status: JobStatus, local: f64) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Completed => 100,
            _ => match self.spec(status) {
                Some(spec) => {
                    let local = if local.is_finite() {
                        local.clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    let value = f64::from(spec.base) + f64::from(spec.weight) * local;
                    value.floor().min(100.0) as u8
                }
                None => 0,
            },
        }
    }
}
