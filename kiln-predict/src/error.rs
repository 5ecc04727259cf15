//! Error types for prediction runs

use thiserror::Error;

/// Result type alias for prediction operations
pub type Result<T> = std::result::Result<T, PredictionError>;

/// Ways a prediction run can end without an output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    /// The remote prediction reported `failed`
    #[error("prediction failed: {0}")]
    ExternalService(String),

    /// The remote prediction reported `canceled`
    #[error("prediction was canceled")]
    Canceled,

    /// No terminal status within the local wait budget
    #[error("prediction did not finish within {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    /// The model key is not present in the catalog
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Talking to the prediction API failed
    #[error("prediction API request failed: {0}")]
    Transport(String),
}

impl PredictionError {
    /// Create a transport error from a status code and response body
    pub fn api_error(status: u16, message: impl AsRef<str>) -> Self {
        Self::Transport(format!("status {}: {}", status, message.as_ref()))
    }
}

impl From<reqwest::Error> for PredictionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PredictionError::ExternalService("CUDA out of memory".into()).to_string(),
            "prediction failed: CUDA out of memory"
        );
        assert_eq!(
            PredictionError::Timeout { waited_ms: 5000 }.to_string(),
            "prediction did not finish within 5000 ms"
        );
        assert_eq!(
            PredictionError::api_error(502, "bad gateway").to_string(),
            "prediction API request failed: status 502: bad gateway"
        );
    }
}
