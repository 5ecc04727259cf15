//! Service Module
//!
//! Business logic layer for the orchestrator: the pipeline coordinator, the
//! subtask tracker it fans out through, and the stage collaborators.

pub mod coordinator;
pub mod stages;
pub mod tracker;

#[cfg(test)]
pub(crate) mod fakes;

pub use coordinator::{
    Collaborators, CoordinatorError, CoordinatorSettings, PipelineCoordinator, SubmitError,
};
pub use stages::{
    Analyzer, ArtifactStore, Compositor, LocalArtifactStore, PassthroughCompositor, StageError,
    TemplateAnalyzer, UnitPlan,
};
pub use tracker::{SettledUnit, SubtaskTracker, UnitOutcome};
