//! Prediction configuration
//!
//! Connection settings for the remote prediction API, polling budgets, the
//! model catalog and download retry settings.

use std::time::Duration;

use crate::catalog::ModelCatalog;
use crate::client::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, RunOptions};
use crate::download::{DEFAULT_MAX_RETRIES, RetryingDownloader};

pub const DEFAULT_API_URL: &str = "https://api.replicate.com/v1";

pub const MODEL_IMAGE: &str = "image";
pub const MODEL_CLIP: &str = "clip";
pub const MODEL_CAPTION: &str = "caption";

/// Prediction configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Prediction API base URL (e.g., "https://api.replicate.com/v1")
    pub api_url: String,

    /// Bearer token for the prediction API
    pub api_token: String,

    /// How often to poll an in-flight prediction
    pub poll_interval: Duration,

    /// Local wait budget for a single prediction
    pub max_wait: Duration,

    /// Attempts per artifact download
    pub download_max_retries: u32,

    /// Logical model keys to vendor model references
    pub models: ModelCatalog,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(api_url: String, api_token: String) -> Self {
        Self {
            api_url,
            api_token,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            download_max_retries: DEFAULT_MAX_RETRIES,
            models: default_models(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PREDICTION_API_TOKEN (required)
    /// - PREDICTION_API_URL (optional, default: https://api.replicate.com/v1)
    /// - PREDICTION_POLL_INTERVAL_MS (optional, default: 3000)
    /// - PREDICTION_MAX_WAIT_MS (optional, default: 300000)
    /// - DOWNLOAD_MAX_RETRIES (optional, default: 3)
    /// - MODEL_IMAGE / MODEL_CLIP / MODEL_CAPTION (optional model overrides)
    pub fn from_env() -> anyhow::Result<Self> {
        let api_token = std::env::var("PREDICTION_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("PREDICTION_API_TOKEN environment variable not set"))?;

        let api_url =
            std::env::var("PREDICTION_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let poll_interval = std::env::var("PREDICTION_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let max_wait = std::env::var("PREDICTION_MAX_WAIT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MAX_WAIT);

        let download_max_retries = std::env::var("DOWNLOAD_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let mut models = default_models();
        for (key, var) in [
            (MODEL_IMAGE, "MODEL_IMAGE"),
            (MODEL_CLIP, "MODEL_CLIP"),
            (MODEL_CAPTION, "MODEL_CAPTION"),
        ] {
            if let Ok(model) = std::env::var(var) {
                models.insert(key, model);
            }
        }

        Ok(Self {
            api_url,
            api_token,
            poll_interval,
            max_wait,
            download_max_retries,
            models,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!("api_token cannot be empty");
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_wait < self.poll_interval {
            anyhow::bail!("max_wait must be at least poll_interval");
        }

        for key in [MODEL_IMAGE, MODEL_CLIP, MODEL_CAPTION] {
            if self.models.resolve(key).is_none_or(str::is_empty) {
                anyhow::bail!("model '{}' is not configured", key);
            }
        }

        Ok(())
    }

    /// Polling options for one run, without observers
    pub fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_max_wait(self.max_wait)
            .with_poll_interval(self.poll_interval)
    }

    /// HTTP downloader using the configured retry count
    pub fn downloader(&self) -> RetryingDownloader {
        RetryingDownloader::http().with_max_retries(self.download_max_retries)
    }
}

fn default_models() -> ModelCatalog {
    ModelCatalog::new()
        .with_model(MODEL_IMAGE, "black-forest-labs/flux-schnell")
        .with_model(MODEL_CLIP, "lucataco/video-clipper")
        .with_model(MODEL_CAPTION, "fictions-ai/autocaption")
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL.to_string(), "dev-token".to_string())
    }
}
