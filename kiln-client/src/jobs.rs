//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use kiln_core::domain::config::JobConfig;
use kiln_core::dto::health::HealthResponse;
use kiln_core::dto::job::{JobSummary, SubmitJobResponse};
use kiln_core::dto::status::JobStatusView;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Jobs
    // =============================================================================

    /// Submit a job
    ///
    /// The orchestrator validates the config and answers `202 Accepted` with
    /// the new job id; the job itself runs in the background.
    ///
    /// # Example
    /// ```no_run
    /// # use kiln_client::OrchestratorClient;
    /// # use kiln_core::domain::config::{JobConfig, VideoClippingConfig};
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let submitted = client
    ///     .submit_job(&JobConfig::VideoClipping(VideoClippingConfig::new(
    ///         "https://cdn.example.com/talk.mp4",
    ///         3,
    ///     )))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_job(&self, config: &JobConfig) -> Result<SubmitJobResponse> {
        let url = format!("{}/jobs", self.base_url);
        let response = self.client.post(&url).json(config).send().await?;

        self.handle_response(response).await
    }

    /// Get the current status of a job
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = format!("{}/jobs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Health
    // =============================================================================

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
