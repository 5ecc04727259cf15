//! Job API Handlers
//!
//! HTTP endpoints for submitting jobs and reading their status.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use kiln_core::domain::config::JobConfig;
use kiln_core::domain::job::JobStatus;
use kiln_core::dto::job::{JobSummary, SubmitJobResponse};
use kiln_core::dto::status::JobStatusView;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::PipelineCoordinator;

/// POST /jobs
/// Validate a kind-tagged config and start the job in the background
pub async fn submit_job(
    State(coordinator): State<PipelineCoordinator>,
    body: Result<Json<JobConfig>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(config) = body?;
    tracing::info!("Submitting {} job", config.kind());

    let job_id = coordinator.submit(config).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /jobs/{id}
/// Current status of a job; clients poll this until it is terminal
pub async fn get_job(
    State(coordinator): State<PipelineCoordinator>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    tracing::debug!("Getting job: {}", id);

    let view = coordinator
        .status(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))?;

    Ok(Json(view))
}

/// GET /jobs
/// List all jobs, newest first
pub async fn list_jobs(
    State(coordinator): State<PipelineCoordinator>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing all jobs");

    let jobs = coordinator.list().await?;
    Ok(Json(jobs))
}
