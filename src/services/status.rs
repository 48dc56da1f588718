use std::sync::Arc;

use crate::db::{RepositoryError, ResultRepository};
use crate::models::job::JobView;

/// Read-only view of committed job state.
pub struct StatusReader {
    repository: Arc<dyn ResultRepository>,
}

impl StatusReader {
    pub fn new(repository: Arc<dyn ResultRepository>) -> Self {
        Self { repository }
    }

    /// Look up a job. Unknown identifiers, and jobs whose outcome has not been
    /// committed while no pending row exists, both report `NotFound`.
    pub async fn get_status(&self, job_id: &str) -> Result<JobView, StatusError> {
        self.repository
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(job_id.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Failed to read job: {0}")]
    Repository(#[from] RepositoryError),
}
