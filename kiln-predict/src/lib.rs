//! Kiln Predict
//!
//! Client side of remote asynchronous prediction APIs.
//!
//! A prediction is submitted, then polled until the remote side reports a
//! terminal status or the local wait budget runs out. Outputs are ephemeral
//! URLs, so [`RetryingDownloader`] is used right after a success to rescue the
//! artifact before it expires.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_predict::{HttpPredictionApi, ModelCatalog, PredictionClient, RunOptions};
//!
//! # async fn example() -> Result<(), kiln_predict::PredictionError> {
//! let api = HttpPredictionApi::new("https://api.replicate.com/v1", "token");
//! let catalog = ModelCatalog::new().with_model("image", "black-forest-labs/flux-schnell");
//! let client = PredictionClient::new(Arc::new(api), catalog);
//!
//! let output = client
//!     .run("image", serde_json::json!({ "prompt": "a kiln at night" }), RunOptions::default())
//!     .await?;
//! println!("{:?}", output.first_url());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod download;
pub mod error;

pub use api::{HttpPredictionApi, Prediction, PredictionApi, RemoteStatus};
pub use catalog::ModelCatalog;
pub use client::{PollObserver, PollSnapshot, PredictionClient, PredictionOutput, RunOptions};
pub use config::Config;
pub use download::{ArtifactSource, DownloadError, HttpArtifactSource, RetryingDownloader};
pub use error::{PredictionError, Result};
