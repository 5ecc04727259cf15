//! Core domain types
//!
//! This module contains the core domain structures used across Kiln services.
//! These types are written by the orchestrator and read by clients through the
//! status DTOs.

pub mod config;
pub mod job;
pub mod stage;
pub mod subtask;
