//! Health Check API Handler
//!
//! Simple health check endpoint for monitoring.

use axum::Json;
use kiln_core::dto::health::HealthResponse;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    ))
}
