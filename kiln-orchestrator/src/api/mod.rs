//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::PipelineCoordinator;

/// Create the main API router with all endpoints
pub fn create_router(coordinator: PipelineCoordinator) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", get(job::list_jobs).post(job::submit_job))
        .route("/jobs/{id}", get(job::get_job))
        // Add state and middleware
        .with_state(coordinator)
        .layer(TraceLayer::new_for_http())
        // The dashboard polls job status from the browser
        .layer(CorsLayer::permissive())
}
