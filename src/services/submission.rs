use parking_lot::Mutex;
use std::sync::Arc;
use ulid::{Generator, Ulid};

use crate::db::{RepositoryError, ResultRepository};
use crate::services::queue::{JobPublisher, QueueError};

/// Allocates job identifiers and hands jobs to the queue.
pub struct JobSubmitter {
    publisher: Arc<dyn JobPublisher>,
    repository: Arc<dyn ResultRepository>,
    write_pending: bool,
    ids: Mutex<Generator>,
}

/// Identifier and image reference of an accepted job.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub job_id: String,
    pub image_url: String,
}

impl JobSubmitter {
    pub fn new(
        publisher: Arc<dyn JobPublisher>,
        repository: Arc<dyn ResultRepository>,
        write_pending: bool,
    ) -> Self {
        Self {
            publisher,
            repository,
            write_pending,
            ids: Mutex::new(Generator::new()),
        }
    }

    /// Next ULID; strictly increasing within this process.
    pub fn next_job_id(&self) -> String {
        let mut ids = self.ids.lock();
        // Overflow only happens after 2^80 ids in one millisecond.
        ids.generate().unwrap_or_else(|_| Ulid::new()).to_string()
    }

    /// Accept a job: allocate its id, optionally persist it as pending, publish.
    pub async fn submit(&self, image_url: &str) -> Result<SubmittedJob, SubmitError> {
        let job_id = self.next_job_id();

        if self.write_pending {
            self.repository.create_pending(&job_id, image_url).await?;
        }

        if let Err(e) = self.publisher.publish(&job_id, image_url).await {
            if self.write_pending {
                self.abandon_pending(&job_id, image_url, &e).await;
            }
            return Err(e.into());
        }

        metrics::counter!("jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, image_url = %image_url, "Job submitted");

        Ok(SubmittedJob {
            job_id,
            image_url: image_url.to_string(),
        })
    }

    /// The caller never learns the id of an unpublished job, so its pending
    /// row would otherwise stay pending forever.
    async fn abandon_pending(&self, job_id: &str, image_url: &str, cause: &QueueError) {
        let reason = format!("enqueue failed: {cause}");
        if let Err(e) = self
            .repository
            .mark_failed_if_not_terminal(job_id, image_url, &reason)
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Could not close out unpublished job");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Failed to record pending job: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to enqueue job: {0}")]
    Publish(#[from] QueueError),
}
