//! Shared helpers for the HTTP integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use kiln_orchestrator::api::create_router;
use kiln_orchestrator::repository::InMemoryJobStore;
use kiln_orchestrator::service::stages::InMemoryArtifactStore;
use kiln_orchestrator::service::{
    Collaborators, CoordinatorSettings, PassthroughCompositor, PipelineCoordinator,
    TemplateAnalyzer,
};
use kiln_predict::{
    ArtifactSource, ModelCatalog, Prediction, PredictionApi, PredictionClient, PredictionError,
    RemoteStatus, RetryingDownloader, RunOptions,
};
use serde_json::Value;
use tower::ServiceExt;

/// Every prediction succeeds on its first poll
pub struct InstantApi {
    next_id: AtomicU32,
}

#[async_trait]
impl PredictionApi for InstantApi {
    async fn submit(&self, _model: &str, _input: &Value) -> Result<Prediction, PredictionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Prediction {
            id: format!("p-{}", id),
            status: RemoteStatus::Starting,
            output: None,
            error: None,
        })
    }

    async fn get(&self, prediction_id: &str) -> Result<Prediction, PredictionError> {
        Ok(Prediction {
            id: prediction_id.to_string(),
            status: RemoteStatus::Succeeded,
            output: Some(Value::String(format!("https://cdn.test/{}.png", prediction_id))),
            error: None,
        })
    }

    async fn cancel(&self, _prediction_id: &str) -> Result<(), PredictionError> {
        Ok(())
    }
}

pub struct StaticSource;

#[async_trait]
impl ArtifactSource for StaticSource {
    async fn get(&self, _url: &str) -> Result<Vec<u8>, String> {
        Ok(b"artifact".to_vec())
    }
}

pub fn build_test_app() -> Router {
    let collaborators = Collaborators {
        store: Arc::new(InMemoryJobStore::new()),
        analyzer: Arc::new(TemplateAnalyzer::new()),
        compositor: Arc::new(PassthroughCompositor::new()),
        artifacts: Arc::new(InMemoryArtifactStore::new()),
    };
    let catalog = ModelCatalog::new()
        .with_model("image", "test/image")
        .with_model("clip", "test/clip")
        .with_model("caption", "test/caption");
    let api = InstantApi {
        next_id: AtomicU32::new(0),
    };

    let coordinator = PipelineCoordinator::new(
        collaborators,
        PredictionClient::new(Arc::new(api), catalog),
        RetryingDownloader::new(Arc::new(StaticSource)),
        CoordinatorSettings {
            run_options: RunOptions::default()
                .with_poll_interval(Duration::from_millis(10))
                .with_max_wait(Duration::from_secs(5)),
            max_concurrent_subtasks: 4,
        },
    );
    create_router(coordinator)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
