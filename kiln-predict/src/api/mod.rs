//! Prediction API layer
//!
//! Stateless access to the remote prediction service. The trait is the seam
//! the polling client is written against, so tests can script remote status
//! sequences without a network.

mod http;

pub use http::HttpPredictionApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Remote prediction status as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Succeeded | RemoteStatus::Failed | RemoteStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Starting => "starting",
            RemoteStatus::Processing => "processing",
            RemoteStatus::Succeeded => "succeeded",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known state of a remote prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Request body for creating a prediction
#[derive(Debug, Clone, Serialize)]
pub struct CreatePrediction<'a> {
    pub model: &'a str,
    pub input: &'a serde_json::Value,
}

/// Operations offered by a remote asynchronous prediction API
#[async_trait]
pub trait PredictionApi: Send + Sync {
    /// Submits a prediction and returns its id and initial status
    async fn submit(&self, model: &str, input: &serde_json::Value) -> Result<Prediction>;

    /// Fetches the current state of a prediction
    async fn get(&self, prediction_id: &str) -> Result<Prediction>;

    /// Asks the service to stop a prediction. Advisory only.
    async fn cancel(&self, prediction_id: &str) -> Result<()>;
}
