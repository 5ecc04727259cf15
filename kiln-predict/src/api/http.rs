//! HTTP implementation of the prediction API
//!
//! - `POST {base}/predictions` with `{ model, input }`
//! - `GET {base}/predictions/{id}`
//! - `POST {base}/predictions/{id}/cancel`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::{CreatePrediction, Prediction, PredictionApi};
use crate::error::{PredictionError, Result};

/// Upper bound on a single request to the prediction API
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prediction API over HTTP with bearer-token auth
#[derive(Debug, Clone)]
pub struct HttpPredictionApi {
    base_url: String,
    token: String,
    client: Client,
}

impl HttpPredictionApi {
    /// Creates a new HTTP prediction API
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the service (e.g., "https://api.replicate.com/v1")
    /// * `token` - API token sent as a bearer token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(base_url, token, client)
    }

    /// Creates a new HTTP prediction API with a configured reqwest client
    pub fn with_client(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PredictionError::api_error(status.as_u16(), error_text));
        }

        response.json().await.map_err(|e| {
            PredictionError::Transport(format!("Failed to parse prediction response: {}", e))
        })
    }
}

#[async_trait]
impl PredictionApi for HttpPredictionApi {
    async fn submit(&self, model: &str, input: &serde_json::Value) -> Result<Prediction> {
        let url = format!("{}/predictions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CreatePrediction { model, input })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn get(&self, prediction_id: &str) -> Result<Prediction> {
        let url = format!("{}/predictions/{}", self.base_url, prediction_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn cancel(&self, prediction_id: &str) -> Result<()> {
        let url = format!("{}/predictions/{}/cancel", self.base_url, prediction_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PredictionError::api_error(status.as_u16(), error_text));
        }
        Ok(())
    }
}
