//! End-to-end tests against a running deployment.
//!
//! These tests require:
//! 1. PostgreSQL and Redis running
//! 2. API server running
//! 3. Worker process running with Roboflow credentials
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override the default (http://localhost:3000) and
//! E2E_IMAGE_URL to choose the image sent for detection.

use serde_json::{json, Value};
use std::time::Duration;

fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn image_url() -> String {
    std::env::var("E2E_IMAGE_URL").unwrap_or_else(|_| {
        "https://upload.wikimedia.org/wikipedia/commons/4/4d/Cat_November_2010-1a.jpg".to_string()
    })
}

async fn submit(client: &reqwest::Client, image_url: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/v1/jobs", base_url()))
        .json(&json!({ "image_url": image_url }))
        .send()
        .await
        .expect("Submit request failed")
}

/// Poll the status endpoint until the job reaches a terminal state.
async fn wait_for_terminal(client: &reqwest::Client, job_id: &str, timeout: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url(), job_id))
            .send()
            .await
            .expect("Status request failed");

        if response.status().is_success() {
            let body: Value = response.json().await.expect("Invalid status body");
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} did not finish within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[tokio::test]
#[ignore]
async fn test_e2e_health_check() {
    let response = reqwest::get(format!("{}/health", base_url()))
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned {}",
        response.status()
    );
}

#[tokio::test]
#[ignore]
async fn test_e2e_submit_and_complete() {
    let client = reqwest::Client::new();

    let response = submit(&client, &image_url()).await;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();
    println!("Submitted job {job_id}");

    let view = wait_for_terminal(&client, &job_id, Duration::from_secs(120)).await;
    assert_eq!(view["status"], "completed", "job ended as {view}");
    assert!(view["processed_at"].is_string());

    for prediction in view["predictions"].as_array().unwrap() {
        let confidence = prediction["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }
    println!(
        "Job {job_id} completed with {} predictions",
        view["predictions"].as_array().unwrap().len()
    );
}

#[tokio::test]
#[ignore]
async fn test_e2e_unknown_job_is_not_found() {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/api/v1/jobs/01HFNOSUCHJOB0000000000000", base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn test_e2e_invalid_submission_rejected() {
    let client = reqwest::Client::new();
    let response = submit(&client, "not a url").await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}
