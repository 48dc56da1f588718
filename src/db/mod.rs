use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::job::{JobResult, JobView};

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable store for job state and detection results.
///
/// This is the only component allowed to mutate persisted jobs. Every write
/// is atomic: readers see the whole previous state or the whole new one.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Record a submitted job as `pending`. An existing row is left untouched.
    async fn create_pending(&self, job_id: &str, image_url: &str) -> Result<(), RepositoryError>;

    /// Insert or update the job row and replace its full prediction set.
    ///
    /// Status, error and processed time are overwritten on conflict (last
    /// writer wins); the image reference keeps its first written value.
    async fn upsert(&self, result: &JobResult) -> Result<(), RepositoryError>;

    /// Record a job as `failed` unless it already reached a terminal state.
    ///
    /// Absent jobs are inserted and `pending` rows are updated; `completed`
    /// and `failed` rows are left untouched. Returns whether a row was written.
    async fn mark_failed_if_not_terminal(
        &self,
        job_id: &str,
        image_url: &str,
        reason: &str,
    ) -> Result<bool, RepositoryError>;

    /// Fetch a job and its predictions.
    async fn get_by_id(&self, job_id: &str) -> Result<Option<JobView>, RepositoryError>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> Result<(), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored job {job_id} has unknown status {status:?}")]
    CorruptStatus { job_id: String, status: String },

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}
