//! HTTP API against in-memory queue and repository backends.

mod fixtures;
mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use fixtures::*;
use helpers::*;
use vision_pipeline::app_state::AppState;
use vision_pipeline::db::memory::InMemoryResultRepository;
use vision_pipeline::models::job::JobStatus;
use vision_pipeline::routes::router;
use vision_pipeline::services::queue::memory::InMemoryJobQueue;
use vision_pipeline::services::queue::JobConsumer;
use vision_pipeline::services::worker::Worker;

struct TestApp {
    router: Router,
    queue: Arc<InMemoryJobQueue>,
    repository: Arc<InMemoryResultRepository>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_pending_rows(true)
    }

    fn with_pending_rows(write_pending: bool) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new());
        let repository = Arc::new(InMemoryResultRepository::new());
        let state = AppState::new(repository.clone(), queue.clone(), write_pending);
        Self {
            router: router(state),
            queue,
            repository,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn submit(&self, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post("/api/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get_job(&self, job_id: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(format!("/api/v1/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

#[tokio::test]
async fn test_submit_returns_accepted_with_ulid() {
    let app = TestApp::new();
    let (status, body) = app.submit(json!({"image_url": IMAGE_URL})).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap();
    assert!(ulid::Ulid::from_string(job_id).is_ok());

    let queued = app.queue.ready_envelopes();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].correlation_id, job_id);
}

#[tokio::test]
async fn test_submitted_ids_are_unique_and_ordered() {
    let app = TestApp::new();
    let mut ids = Vec::new();
    for _ in 0..5 {
        let (_, body) = app.submit(json!({"image_url": IMAGE_URL})).await;
        ids.push(body["job_id"].as_str().unwrap().to_string());
    }
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_get_distinct_ids() {
    let app = TestApp::new();
    let responses = futures::future::join_all(
        (0..20).map(|_| app.submit(json!({"image_url": IMAGE_URL}))),
    )
    .await;

    let mut ids: Vec<String> = responses
        .into_iter()
        .map(|(status, body)| {
            assert_eq!(status, StatusCode::ACCEPTED);
            body["job_id"].as_str().unwrap().to_string()
        })
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(app.queue.ready_len(), 20);
    assert_eq!(app.repository.len(), 20);
}

#[tokio::test]
async fn test_submit_rejects_invalid_url() {
    let app = TestApp::new();
    for image_url in ["", "not a url", "ftp://x/img.png"] {
        let (status, body) = app.submit(json!({"image_url": image_url})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {image_url:?}");
        assert_eq!(body["error"], "validation_error");
    }
    assert_eq!(app.queue.ready_len(), 0);
    assert!(app.repository.is_empty());
}

#[tokio::test]
async fn test_submit_rejects_missing_field() {
    let app = TestApp::new();
    let (status, body) = app.submit(json!({"url": IMAGE_URL})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_submit_when_queue_down_is_bad_gateway() {
    let app = TestApp::with_pending_rows(false);
    app.queue.set_unavailable(true);

    let (status, body) = app.submit(json!({"image_url": IMAGE_URL})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "publish_error");
    assert!(app.repository.is_empty());
}

#[tokio::test]
async fn test_queue_down_leaves_no_pending_row() {
    let app = TestApp::new();
    app.queue.set_unavailable(true);

    let (status, _) = app.submit(json!({"image_url": IMAGE_URL})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(app.repository.count_with_status(JobStatus::Pending), 0);
    assert_eq!(app.repository.count_with_status(JobStatus::Failed), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app.get_job("01HFNOSUCHJOB").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_blank_job_id_is_bad_request() {
    let app = TestApp::new();
    let (status, _) = app.get_job("%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pending_job_visible_after_submit() {
    let app = TestApp::new();
    let (_, submitted) = app.submit(json!({"image_url": IMAGE_URL})).await;
    let job_id = submitted["job_id"].as_str().unwrap();

    let (status, body) = app.get_job(job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["image_url"], IMAGE_URL);
    assert!(body["processed_at"].is_null());
    assert_eq!(body["predictions"], json!([]));
}

#[tokio::test]
async fn test_completed_job_view() {
    let app = TestApp::new();
    let (_, submitted) = app.submit(json!({"image_url": IMAGE_URL})).await;
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    // Run the queued job through a worker sharing the app's backends.
    let detector = Arc::new(ScriptedDetector::always(Step::Detect(cat_and_dog())));
    let worker = Worker::new(
        app.queue.clone(),
        detector,
        app.repository.clone(),
        test_config(),
    );
    let delivery = app
        .queue
        .receive(std::time::Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    worker.handle_delivery(delivery).await;

    let (status, body) = app.get_job(&job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id);
    assert_eq!(body["status"], "completed");
    assert!(body["processed_at"].is_string());

    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0]["class"], "cat");
    assert_eq!(predictions[0]["confidence"], 0.92);
    assert!(predictions[0]["id"].is_string());
    assert_eq!(predictions[1]["class"], "dog");
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["database"]["status"], "ok");
    assert_eq!(body["checks"]["queue"]["status"], "ok");
}

#[tokio::test]
async fn test_health_degraded_when_queue_down() {
    let app = TestApp::new();
    app.queue.set_unavailable(true);
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["queue"]["status"], "error");
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_rendered_with_recorder() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let repository = Arc::new(InMemoryResultRepository::new());
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let state = AppState::new(repository, queue, true).with_metrics(handle);

    let response = router(state)
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
