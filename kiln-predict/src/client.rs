//! Prediction client
//!
//! Submits a prediction and polls it until the remote side reports a
//! terminal status or the local wait budget runs out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::api::{Prediction, PredictionApi, RemoteStatus};
use crate::catalog::ModelCatalog;
use crate::error::{PredictionError, Result};

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(300_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);

/// What the client saw, handed to every observer after submission
/// (`poll_count` 0) and after each status fetch
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub prediction_id: String,
    pub status: RemoteStatus,
    /// Time since submission
    pub elapsed: Duration,
    pub poll_count: u32,
}

/// Receives a snapshot after submission and after every poll, whether or
/// not the status changed
pub trait PollObserver: Send + Sync {
    fn on_poll(&self, snapshot: &PollSnapshot);
}

impl<F> PollObserver for F
where
    F: Fn(&PollSnapshot) + Send + Sync,
{
    fn on_poll(&self, snapshot: &PollSnapshot) {
        self(snapshot)
    }
}

/// Per-run polling options
#[derive(Clone)]
pub struct RunOptions {
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub observers: Vec<Arc<dyn PollObserver>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            observers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_wait", &self.max_wait)
            .field("poll_interval", &self.poll_interval)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RunOptions {
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_observer(mut self, observer: impl PollObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    fn notify(&self, snapshot: &PollSnapshot) {
        for observer in &self.observers {
            observer.on_poll(snapshot);
        }
    }
}

/// Output of a succeeded prediction
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutput {
    pub prediction_id: String,
    pub value: Option<Value>,
    pub poll_count: u32,
}

impl PredictionOutput {
    /// First artifact URL in the output.
    ///
    /// Accepts a plain string, an array whose first string element is taken,
    /// or an object with a `url` field.
    pub fn first_url(&self) -> Option<&str> {
        match self.value.as_ref()? {
            Value::String(url) => Some(url),
            Value::Array(items) => items.iter().find_map(|v| v.as_str()),
            Value::Object(map) => map.get("url").and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

/// Runs predictions against a [`PredictionApi`]
#[derive(Clone)]
pub struct PredictionClient {
    api: Arc<dyn PredictionApi>,
    catalog: ModelCatalog,
}

impl PredictionClient {
    pub fn new(api: Arc<dyn PredictionApi>, catalog: ModelCatalog) -> Self {
        Self { api, catalog }
    }

    /// Runs one prediction to a terminal status.
    ///
    /// Returns within `max_wait + poll_interval` of submission. Every API
    /// call is bounded by the remaining budget; failed polls are retried
    /// until it runs out. On timeout a cancel is sent to the service and its
    /// outcome ignored.
    pub async fn run(
        &self,
        model_key: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<PredictionOutput> {
        let model = self
            .catalog
            .resolve(model_key)
            .ok_or_else(|| PredictionError::UnknownModel(model_key.to_string()))?
            .to_string();

        let started = Instant::now();
        let prediction = match timeout(options.max_wait, self.api.submit(&model, &input)).await {
            Ok(submitted) => submitted?,
            Err(_) => {
                warn!("Submitting to model {} did not answer within {:?}", model, options.max_wait);
                return Err(PredictionError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };
        info!(
            "Submitted prediction {} for model {} ({})",
            prediction.id, model, prediction.status
        );

        options.notify(&PollSnapshot {
            prediction_id: prediction.id.clone(),
            status: prediction.status,
            elapsed: started.elapsed(),
            poll_count: 0,
        });

        if prediction.status.is_terminal() {
            return resolve(prediction, 0);
        }

        let prediction_id = prediction.id;
        let mut poll_count: u32 = 0;

        loop {
            tokio::time::sleep(options.poll_interval).await;

            if started.elapsed() > options.max_wait {
                return Err(self.give_up(&prediction_id, started, &options).await);
            }

            let remaining = options.max_wait.saturating_sub(started.elapsed());
            let prediction = match timeout(remaining, self.api.get(&prediction_id)).await {
                Ok(Ok(prediction)) => prediction,
                Ok(Err(e)) => {
                    warn!("Polling prediction {} failed, retrying: {}", prediction_id, e);
                    continue;
                }
                Err(_) => return Err(self.give_up(&prediction_id, started, &options).await),
            };
            poll_count += 1;

            options.notify(&PollSnapshot {
                prediction_id: prediction_id.clone(),
                status: prediction.status,
                elapsed: started.elapsed(),
                poll_count,
            });

            if prediction.status.is_terminal() {
                debug!(
                    "Prediction {} finished as {} after {} polls",
                    prediction_id, prediction.status, poll_count
                );
                return resolve(prediction, poll_count);
            }
        }
    }

    /// Best-effort cancel, bounded by one poll interval
    async fn give_up(
        &self,
        prediction_id: &str,
        started: Instant,
        options: &RunOptions,
    ) -> PredictionError {
        let elapsed = started.elapsed();
        warn!(
            "Prediction {} still running after {:?}, canceling",
            prediction_id, elapsed
        );
        match timeout(options.poll_interval, self.api.cancel(prediction_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Cancel of prediction {} failed: {}", prediction_id, e),
            Err(_) => debug!("Cancel of prediction {} did not answer", prediction_id),
        }
        PredictionError::Timeout {
            waited_ms: elapsed.as_millis() as u64,
        }
    }
}

fn resolve(prediction: Prediction, poll_count: u32) -> Result<PredictionOutput> {
    match prediction.status {
        RemoteStatus::Succeeded => Ok(PredictionOutput {
            prediction_id: prediction.id,
            value: prediction.output,
            poll_count,
        }),
        RemoteStatus::Failed => Err(PredictionError::ExternalService(
            prediction
                .error
                .unwrap_or_else(|| "no error message".to_string()),
        )),
        RemoteStatus::Canceled => Err(PredictionError::Canceled),
        other => Err(PredictionError::Transport(format!(
            "prediction {} is not terminal ({})",
            prediction.id, other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves a scripted status sequence: the first entry answers `submit`,
    /// the rest answer successive `get` calls. The last entry repeats.
    pub(crate) struct ScriptedApi {
        script: Mutex<VecDeque<RemoteStatus>>,
        last: Mutex<RemoteStatus>,
        pub(crate) gets: AtomicU32,
        pub(crate) cancels: AtomicU32,
        pub(crate) models: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        pub(crate) fn new(script: &[RemoteStatus]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(RemoteStatus::Starting),
                gets: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
                models: Mutex::new(Vec::new()),
            }
        }

        fn next(&self) -> Prediction {
            let status = match self.script.lock().unwrap().pop_front() {
                Some(status) => {
                    *self.last.lock().unwrap() = status;
                    status
                }
                None => *self.last.lock().unwrap(),
            };
            Prediction {
                id: "pred-1".to_string(),
                status,
                output: (status == RemoteStatus::Succeeded)
                    .then(|| serde_json::json!(["https://cdn.example.com/out.png"])),
                error: (status == RemoteStatus::Failed).then(|| "CUDA out of memory".to_string()),
            }
        }
    }

    #[async_trait]
    impl PredictionApi for ScriptedApi {
        async fn submit(&self, model: &str, _input: &Value) -> Result<Prediction> {
            self.models.lock().unwrap().push(model.to_string());
            Ok(self.next())
        }

        async fn get(&self, _prediction_id: &str) -> Result<Prediction> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.next())
        }

        async fn cancel(&self, _prediction_id: &str) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Err(PredictionError::api_error(500, "cancel not supported"))
        }
    }

    fn client(api: Arc<ScriptedApi>) -> PredictionClient {
        PredictionClient::new(api, ModelCatalog::new().with_model("model-x", "owner/model-x:v1"))
    }

    fn fast_options() -> RunOptions {
        RunOptions::default()
            .with_max_wait(Duration::from_millis(5000))
            .with_poll_interval(Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_succeeded() {
        use RemoteStatus::*;
        let api = Arc::new(ScriptedApi::new(&[
            Starting, Processing, Processing, Succeeded,
        ]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = fast_options().with_observer(move |s: &PollSnapshot| {
            sink.lock().unwrap().push(s.clone());
        });

        let started = Instant::now();
        let output = client(api.clone())
            .run("model-x", serde_json::json!({ "prompt": "x" }), options)
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(output.poll_count, 3);
        assert_eq!(output.first_url(), Some("https://cdn.example.com/out.png"));
        assert_eq!(api.gets.load(Ordering::SeqCst), 3);
        assert_eq!(api.models.lock().unwrap().as_slice(), ["owner/model-x:v1"]);

        let seen = seen.lock().unwrap();
        let counts: Vec<u32> = seen.iter().map(|s| s.poll_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
        assert_eq!(seen[0].status, Starting);
        assert_eq!(seen[0].elapsed, Duration::ZERO);
        assert_eq!(seen[1].status, Processing);
        assert_eq!(seen[2].status, Processing);
        assert_eq!(seen[3].status, Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_on_submit_skips_polling() {
        let api = Arc::new(ScriptedApi::new(&[RemoteStatus::Succeeded]));
        let output = client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap();
        assert_eq!(output.poll_count, 0);
        assert_eq!(api.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_is_reported_before_first_poll() {
        let api = Arc::new(ScriptedApi::new(&[RemoteStatus::Succeeded]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = fast_options().with_observer(move |s: &PollSnapshot| {
            sink.lock().unwrap().push(s.clone());
        });

        client(api).run("model-x", Value::Null, options).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].prediction_id, "pred-1");
        assert_eq!(seen[0].poll_count, 0);
        assert_eq!(seen[0].status, RemoteStatus::Succeeded);
    }

    /// Answers `submit` with `starting`, then misbehaves on `get`
    enum GetMode {
        /// Never answers
        Hang,
        /// Fails this many times, then reports `succeeded`
        FailTimes(u32),
    }

    struct UnreliableApi {
        mode: GetMode,
        gets: AtomicU32,
        cancels: AtomicU32,
    }

    impl UnreliableApi {
        fn new(mode: GetMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                gets: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PredictionApi for UnreliableApi {
        async fn submit(&self, _model: &str, _input: &Value) -> Result<Prediction> {
            Ok(Prediction {
                id: "pred-9".to_string(),
                status: RemoteStatus::Starting,
                output: None,
                error: None,
            })
        }

        async fn get(&self, prediction_id: &str) -> Result<Prediction> {
            let call = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
            match self.mode {
                GetMode::Hang => std::future::pending::<Result<Prediction>>().await,
                GetMode::FailTimes(n) if call <= n => {
                    Err(PredictionError::api_error(502, "bad gateway"))
                }
                GetMode::FailTimes(_) => Ok(Prediction {
                    id: prediction_id.to_string(),
                    status: RemoteStatus::Succeeded,
                    output: Some(serde_json::json!("https://cdn.example.com/ok.png")),
                    error: None,
                }),
            }
        }

        async fn cancel(&self, _prediction_id: &str) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn unreliable_client(api: Arc<UnreliableApi>) -> PredictionClient {
        PredictionClient::new(api, ModelCatalog::new().with_model("model-x", "owner/model-x:v1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_poll_times_out_and_cancels() {
        let api = UnreliableApi::new(GetMode::Hang);
        let started = Instant::now();
        let err = unreliable_client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionError::Timeout { waited_ms } if waited_ms == 5000));
        assert_eq!(api.gets.load(Ordering::SeqCst), 1);
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() <= Duration::from_millis(5000 + 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_is_retried() {
        let api = UnreliableApi::new(GetMode::FailTimes(1));
        let output = unreliable_client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap();

        assert_eq!(output.first_url(), Some("https://cdn.example.com/ok.png"));
        assert_eq!(output.poll_count, 1);
        assert_eq!(api.gets.load(Ordering::SeqCst), 2);
        assert_eq!(api.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_failing_until_budget_end_in_timeout() {
        let api = UnreliableApi::new(GetMode::FailTimes(u32::MAX));
        let err = unreliable_client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionError::Timeout { waited_ms } if waited_ms == 6000));
        assert_eq!(api.gets.load(Ordering::SeqCst), 5);
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prediction() {
        use RemoteStatus::*;
        let api = Arc::new(ScriptedApi::new(&[Starting, Failed]));
        let err = client(api)
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PredictionError::ExternalService("CUDA out of memory".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_prediction() {
        use RemoteStatus::*;
        let api = Arc::new(ScriptedApi::new(&[Starting, Processing, Canceled]));
        let err = client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap_err();
        assert_eq!(err, PredictionError::Canceled);
        assert_eq!(api.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_swallows_cancel_error() {
        let api = Arc::new(ScriptedApi::new(&[RemoteStatus::Starting, RemoteStatus::Processing]));
        let started = Instant::now();
        let err = client(api.clone())
            .run("model-x", Value::Null, fast_options())
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionError::Timeout { waited_ms } if waited_ms == 6000));
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(api.gets.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() <= Duration::from_millis(5000 + 1000));
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_submit() {
        let api = Arc::new(ScriptedApi::new(&[RemoteStatus::Succeeded]));
        let err = client(api.clone())
            .run("model-y", Value::Null, RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PredictionError::UnknownModel("model-y".to_string()));
        assert!(api.models.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_url_shapes() {
        let output = |value| PredictionOutput {
            prediction_id: "p".to_string(),
            value: Some(value),
            poll_count: 0,
        };
        assert_eq!(
            output(serde_json::json!("https://a/1.png")).first_url(),
            Some("https://a/1.png")
        );
        assert_eq!(
            output(serde_json::json!([null, "https://a/2.png"])).first_url(),
            Some("https://a/2.png")
        );
        assert_eq!(
            output(serde_json::json!({ "url": "https://a/3.mp4" })).first_url(),
            Some("https://a/3.mp4")
        );
        assert_eq!(output(serde_json::json!(42)).first_url(), None);
    }
}
