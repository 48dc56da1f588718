use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vision_pipeline::{
    config::AppConfig,
    db::{self, queries::PgResultRepository},
    services::{
        detection::RoboflowClient,
        queue::redis::RedisJobQueue,
        worker::{Worker, WorkerConfig},
    },
    shutdown::shutdown_signal,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let missing = config.missing_detection_settings();
    if !missing.is_empty() {
        tracing::error!(?missing, "Detection service is not configured");
        std::process::exit(1);
    }

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }

    metrics::describe_histogram!(
        "detection_duration_seconds",
        "Time spent in one detection call"
    );
    metrics::describe_counter!("jobs_completed_total", "Jobs committed as completed");
    metrics::describe_counter!("jobs_failed_total", "Jobs committed as failed");
    metrics::describe_counter!("jobs_dropped_total", "Malformed messages discarded");
    metrics::describe_counter!("jobs_requeued_total", "Deliveries requeued after a transient failure");
    metrics::describe_counter!("jobs_dead_lettered_total", "Deliveries that exhausted their retries");
    metrics::describe_counter!("jobs_unsettled_total", "Deliveries left held after settlement kept failing");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!(queue = %config.queue_name, worker = %config.worker_name, "Connecting to Redis");
    let queue = RedisJobQueue::new(&config.redis_url, &config.queue_name, &config.worker_name)
        .expect("Failed to initialize job queue");

    let detector = RoboflowClient::new(
        &config.roboflow_base_url,
        &config.roboflow_api_key,
        &config.roboflow_workspace_id,
        &config.roboflow_workflow_id,
    )
    .expect("Failed to initialize Roboflow client");

    let worker = Worker::new(
        Arc::new(queue),
        Arc::new(detector),
        Arc::new(PgResultRepository::new(db_pool.clone())),
        WorkerConfig::from(&config),
    );

    let stopper = worker.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.stop();
    });

    worker.run().await;

    db_pool.close().await;
    tracing::info!("Worker exited");
}
