//! Kiln Core
//!
//! Core types and abstractions for the Kiln generation pipeline.
//!
//! This crate contains:
//! - Domain types: Jobs, subtasks, stage profiles and job configs
//! - DTOs: The submission and status payloads exchanged over HTTP

pub mod domain;
pub mod dto;
