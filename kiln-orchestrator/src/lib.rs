//! Kiln Orchestrator
//!
//! Accepts generation jobs over HTTP and drives each one through the stages
//! of its kind in the background. Clients poll `GET /jobs/{id}` for
//! progress.

pub mod api;
pub mod config;
pub mod repository;
pub mod service;

use std::sync::Arc;

use kiln_predict::{HttpPredictionApi, PredictionClient};

use crate::config::Config;
use crate::repository::InMemoryJobStore;
use crate::service::{
    Collaborators, LocalArtifactStore, PassthroughCompositor, PipelineCoordinator,
    TemplateAnalyzer,
};

/// Wires the default collaborators and the HTTP prediction client
pub fn build_coordinator(config: &Config) -> PipelineCoordinator {
    let api = HttpPredictionApi::new(
        config.prediction.api_url.clone(),
        config.prediction.api_token.clone(),
    );
    let prediction = PredictionClient::new(Arc::new(api), config.prediction.models.clone());

    let collaborators = Collaborators {
        store: Arc::new(InMemoryJobStore::new()),
        analyzer: Arc::new(TemplateAnalyzer::new()),
        compositor: Arc::new(PassthroughCompositor::new()),
        artifacts: Arc::new(LocalArtifactStore::new(config.artifact_dir.clone())),
    };

    PipelineCoordinator::new(
        collaborators,
        prediction,
        config.prediction.downloader(),
        config.coordinator_settings(),
    )
}
