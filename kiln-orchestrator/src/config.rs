//! Orchestrator configuration
//!
//! HTTP bind address, artifact storage, subtask fan-out and the prediction
//! settings shared with `kiln-predict`.

use std::path::PathBuf;

use crate::service::coordinator::{CoordinatorSettings, DEFAULT_MAX_CONCURRENT_SUBTASKS};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_ARTIFACT_DIR: &str = "./artifacts";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Directory artifacts are written under
    pub artifact_dir: PathBuf,

    /// Max units of one job stage running at once
    pub max_concurrent_subtasks: usize,

    /// Remote prediction API settings
    pub prediction: kiln_predict::Config,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(prediction: kiln_predict::Config) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            max_concurrent_subtasks: DEFAULT_MAX_CONCURRENT_SUBTASKS,
            prediction,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KILN_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - ARTIFACT_DIR (optional, default: ./artifacts)
    /// - MAX_CONCURRENT_SUBTASKS (optional, default: 4)
    /// - everything read by `kiln_predict::Config::from_env`
    pub fn from_env() -> anyhow::Result<Self> {
        let prediction = kiln_predict::Config::from_env()?;

        let bind_addr =
            std::env::var("KILN_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let artifact_dir = std::env::var("ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACT_DIR));

        let max_concurrent_subtasks = std::env::var("MAX_CONCURRENT_SUBTASKS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SUBTASKS);

        Ok(Self {
            bind_addr,
            artifact_dir,
            max_concurrent_subtasks,
            prediction,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.artifact_dir.as_os_str().is_empty() {
            anyhow::bail!("artifact_dir cannot be empty");
        }

        if self.max_concurrent_subtasks == 0 {
            anyhow::bail!("max_concurrent_subtasks must be greater than 0");
        }

        self.prediction.validate()
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            run_options: self.prediction.run_options(),
            max_concurrent_subtasks: self.max_concurrent_subtasks,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(kiln_predict::Config::default())
    }
}
