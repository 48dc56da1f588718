use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vision_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgResultRepository},
    routes,
    services::queue::redis::RedisJobQueue,
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

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing vision-pipeline API");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("jobs_submitted_total", "Total detection jobs accepted");
    metrics::describe_gauge!("queue_depth", "Jobs waiting in the queue");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job queue
    tracing::info!(queue = %config.queue_name, "Connecting to Redis job queue");
    let queue = RedisJobQueue::new(&config.redis_url, &config.queue_name, &config.worker_name)
        .expect("Failed to initialize job queue");

    let state = AppState::new(
        Arc::new(PgResultRepository::new(db_pool.clone())),
        Arc::new(queue),
        config.write_pending_rows,
    )
    .with_metrics(prometheus_handle);

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    db_pool.close().await;
    tracing::info!("Server stopped");
}
