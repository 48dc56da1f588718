use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound on pooled database connections per process
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Name of the durable job queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Stable consumer name; keys this worker's in-flight list
    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    /// Maximum deliveries processed concurrently by one worker
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Deliveries of one message before it is dead-lettered
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Pause before a transiently failed message is requeued
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Deadline for a single detection call
    #[serde(default = "default_detection_timeout_secs")]
    pub detection_timeout_secs: u64,

    /// How long shutdown waits for in-flight jobs to drain
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Roboflow API key. Required by the worker only.
    #[serde(default)]
    pub roboflow_api_key: String,

    /// Roboflow workspace identifier. Required by the worker only.
    #[serde(default)]
    pub roboflow_workspace_id: String,

    /// Roboflow workflow identifier. Required by the worker only.
    #[serde(default)]
    pub roboflow_workflow_id: String,

    /// Roboflow inference endpoint
    #[serde(default = "default_roboflow_base_url")]
    pub roboflow_base_url: String,

    /// Persist a `pending` row before the job is published
    #[serde(default = "default_write_pending_rows")]
    pub write_pending_rows: bool,

    /// Prometheus listener for the worker process (e.g., "0.0.0.0:9100")
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_queue_name() -> String {
    "detection_jobs".to_string()
}

fn default_worker_name() -> String {
    "worker-1".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_detection_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_roboflow_base_url() -> String {
    "https://detect.roboflow.com".to_string()
}

fn default_write_pending_rows() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Env names of detection settings that are unset or blank.
    pub fn missing_detection_settings(&self) -> Vec<&'static str> {
        [
            ("ROBOFLOW_API_KEY", &self.roboflow_api_key),
            ("ROBOFLOW_WORKSPACE_ID", &self.roboflow_workspace_id),
            ("ROBOFLOW_WORKFLOW_ID", &self.roboflow_workflow_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
