//! Repository Module
//!
//! Data access layer for the orchestrator. Job records sit behind the
//! [`JobStore`] trait; the in-memory store is the default backend.

pub mod job;

pub use job::{InMemoryJobStore, JobStore, JobUpdate, StoreError, SubtaskUpdate};
