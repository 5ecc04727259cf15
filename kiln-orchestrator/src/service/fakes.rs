//! In-memory fakes shared by the service tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiln_predict::{
    ArtifactSource, ModelCatalog, Prediction, PredictionApi, PredictionClient, PredictionError,
    RemoteStatus, RetryingDownloader, RunOptions,
};
use serde_json::{Value, json};

use crate::repository::InMemoryJobStore;
use crate::service::stages::{InMemoryArtifactStore, PassthroughCompositor};
use crate::service::tracker::UnitContext;

/// How a fake prediction behaves, decided from its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// `processing` on the first poll, `succeeded` on the second
    Succeed,
    /// `processing` on the first poll, `failed` on the second
    Fail,
    /// `processing` forever
    Hang,
    /// Panics on the first poll
    Panic,
}

struct Tracked {
    behavior: Behavior,
    polls: u32,
    done: bool,
}

type Decide = dyn Fn(&Value) -> Behavior + Send + Sync;

pub struct FakePredictionApi {
    decide: Box<Decide>,
    predictions: Mutex<HashMap<String, Tracked>>,
    next_id: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    cancels: AtomicU32,
}

impl FakePredictionApi {
    pub fn new(decide: impl Fn(&Value) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            decide: Box::new(decide),
            predictions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        })
    }

    pub fn submitted(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }

    fn settle(&self, tracked: &mut Tracked) {
        if !tracked.done {
            tracked.done = true;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PredictionApi for FakePredictionApi {
    async fn submit(&self, _model: &str, input: &Value) -> Result<Prediction, PredictionError> {
        let id = format!("pred-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let behavior = (self.decide)(input);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.predictions.lock().unwrap().insert(
            id.clone(),
            Tracked {
                behavior,
                polls: 0,
                done: false,
            },
        );
        Ok(Prediction {
            id,
            status: RemoteStatus::Starting,
            output: None,
            error: None,
        })
    }

    async fn get(&self, prediction_id: &str) -> Result<Prediction, PredictionError> {
        let (behavior, polls) = {
            let mut predictions = self.predictions.lock().unwrap();
            let tracked = predictions
                .get_mut(prediction_id)
                .ok_or_else(|| PredictionError::api_error(404, "not found"))?;
            tracked.polls += 1;
            let polls = tracked.polls;
            let behavior = tracked.behavior;
            if polls >= 2 && matches!(behavior, Behavior::Succeed | Behavior::Fail) {
                self.settle(tracked);
            }
            if behavior == Behavior::Panic {
                self.settle(tracked);
            }
            (behavior, polls)
        };

        let mut prediction = Prediction {
            id: prediction_id.to_string(),
            status: RemoteStatus::Processing,
            output: None,
            error: None,
        };
        match behavior {
            Behavior::Panic => panic!("fake prediction backend crashed"),
            Behavior::Succeed if polls >= 2 => {
                prediction.status = RemoteStatus::Succeeded;
                prediction.output = Some(json!([format!(
                    "https://fake.cdn/{}.png?expires=3600",
                    prediction_id
                )]));
            }
            Behavior::Fail if polls >= 2 => {
                prediction.status = RemoteStatus::Failed;
                prediction.error = Some("model crashed".to_string());
            }
            _ => {}
        }
        Ok(prediction)
    }

    async fn cancel(&self, prediction_id: &str) -> Result<(), PredictionError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(tracked) = self.predictions.lock().unwrap().get_mut(prediction_id) {
            self.settle(tracked);
        }
        Ok(())
    }
}

/// Serves the URL itself as the artifact bytes
pub struct EchoSource;

#[async_trait]
impl ArtifactSource for EchoSource {
    async fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        Ok(url.as_bytes().to_vec())
    }
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog::new()
        .with_model("image", "fake/image")
        .with_model("clip", "fake/clip")
        .with_model("caption", "fake/caption")
}

pub fn run_options() -> RunOptions {
    RunOptions::default()
        .with_max_wait(Duration::from_secs(5))
        .with_poll_interval(Duration::from_secs(1))
}

pub fn unit_context(api: Arc<FakePredictionApi>) -> UnitContext {
    UnitContext {
        store: Arc::new(InMemoryJobStore::new()),
        prediction: PredictionClient::new(api, catalog()),
        downloader: RetryingDownloader::new(Arc::new(EchoSource)),
        artifacts: Arc::new(InMemoryArtifactStore::new()),
        compositor: Arc::new(PassthroughCompositor::new()),
        run_options: run_options(),
    }
}
