//! CLI configuration

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the orchestrator
    pub orchestrator_url: String,
}
