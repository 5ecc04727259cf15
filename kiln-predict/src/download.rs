//! Retrying artifact downloader
//!
//! Prediction outputs live behind short-lived URLs, so artifacts are fetched
//! right after a success. Each attempt has its own timeout and failed
//! attempts back off exponentially.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("download failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Where artifact bytes come from. One call is one attempt.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// Fetches artifacts over HTTP; non-success statuses are failures
#[derive(Debug, Clone, Default)]
pub struct HttpArtifactSource {
    client: Client,
}

impl HttpArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {} from {}", status.as_u16(), url));
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

#[derive(Clone)]
pub struct RetryingDownloader {
    source: Arc<dyn ArtifactSource>,
    base_delay: Duration,
    attempt_timeout: Duration,
    max_retries: u32,
}

impl RetryingDownloader {
    pub fn new(source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            source,
            base_delay: DEFAULT_BASE_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Downloader over plain HTTP with default settings
    pub fn http() -> Self {
        Self::new(Arc::new(HttpArtifactSource::new()))
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.fetch_with_retries(url, self.max_retries).await
    }

    /// Fetches `url` making at most `max_retries` attempts (at least one).
    ///
    /// Waits `base_delay * 2^(attempt - 1)` between attempts and never after
    /// the last one.
    pub async fn fetch_with_retries(
        &self,
        url: &str,
        max_retries: u32,
    ) -> Result<Vec<u8>, DownloadError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(self.attempt_timeout, self.source.get(url)).await;

            match result {
                Ok(Ok(bytes)) => {
                    debug!("Downloaded {} bytes from {} (attempt {})", bytes.len(), url, attempt);
                    return Ok(bytes);
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", self.attempt_timeout)
                }
            }

            if attempt < attempts {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "Download attempt {}/{} for {} failed: {}. Retrying in {:?}",
                    attempt, attempts, url, last_error, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(DownloadError::Exhausted {
            attempts,
            last_error,
        })
    }
}
