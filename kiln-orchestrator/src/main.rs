//! Kiln Orchestrator binary
//!
//! Loads configuration from the environment, wires the pipeline coordinator
//! and serves the HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiln_orchestrator::{api, build_coordinator, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kiln_orchestrator=info,kiln_predict=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Prediction API: {}, artifacts: {}, max concurrent subtasks: {}",
        config.prediction.api_url,
        config.artifact_dir.display(),
        config.max_concurrent_subtasks
    );

    tokio::fs::create_dir_all(&config.artifact_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.artifact_dir.display()))?;

    // Build router with all API endpoints
    let coordinator = build_coordinator(&config);
    let app = api::create_router(coordinator);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
