//! Kiln HTTP Client
//!
//! A simple, type-safe HTTP client for the Kiln orchestrator API, plus the
//! [`JobWatcher`] that polls a job's status until it is terminal.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::OrchestratorClient;
//! use kiln_core::domain::config::{ImageGenerationConfig, JobConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let submitted = client
//!         .submit_job(&JobConfig::ImageGeneration(ImageGenerationConfig::new(
//!             "porcelain cup on a linen cloth",
//!             4,
//!         )))
//!         .await?;
//!
//!     println!("Submitted job: {}", submitted.job_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
pub mod watch;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use watch::{JobWatcher, StatusSource, WatchError, WatchOptions, WatchOutcome};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Kiln orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// Error bodies of the form `{"error": "..."}` are unwrapped into the
    /// error message.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(
                status.as_u16(),
                error_message(&error_text),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
