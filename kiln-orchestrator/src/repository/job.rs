//! Job Repository
//!
//! Storage of job records. The coordinator writes job-level fields through
//! [`JobStore::update`]; each subtask unit writes only its own record through
//! [`JobStore::update_subtask`]. Updates are applied atomically per job so the
//! two writers never overwrite each other.

use std::collections::HashMap;

use async_trait::async_trait;
use kiln_core::domain::job::{Job, JobId, TransitionError};
use kiln_core::domain::subtask::Subtask;
use thiserror::Error;
use tokio::sync::RwLock;

/// Mutation applied to a job record under the store's lock
pub type JobUpdate = Box<dyn FnOnce(&mut Job) -> Result<(), TransitionError> + Send>;

/// Mutation applied to one subtask record under the store's lock
pub type SubtaskUpdate = Box<dyn FnOnce(&mut Subtask) -> Result<(), TransitionError> + Send>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("subtask {index} of job {job_id} not found")]
    SubtaskNotFound { job_id: JobId, index: usize },

    #[error("job {0} already exists")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// All jobs, newest first
    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Applies `update` to the job and returns the updated record.
    /// A rejected update leaves the record unchanged.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StoreError>;

    /// Applies `update` to the subtask at `index` and returns it
    async fn update_subtask(
        &self,
        job_id: JobId,
        index: usize,
        update: SubtaskUpdate,
    ) -> Result<Subtask, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let mut draft = job.clone();
        update(&mut draft)?;
        *job = draft;
        Ok(job.clone())
    }

    async fn update_subtask(
        &self,
        job_id: JobId,
        index: usize,
        update: SubtaskUpdate,
    ) -> Result<Subtask, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        let subtask = job
            .subtasks
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or(StoreError::SubtaskNotFound { job_id, index })?;

        let mut draft = subtask.clone();
        update(&mut draft)?;
        *subtask = draft;
        Ok(subtask.clone())
    }
}
