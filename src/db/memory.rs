//! In-memory result repository.
//!
//! Keeps the same atomicity and upsert semantics as the PostgreSQL backend,
//! with a switch to simulate an unavailable database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use super::{RepositoryError, ResultRepository};
use crate::models::job::{JobResult, JobStatus, JobView};
use crate::models::prediction::StoredPrediction;

#[derive(Debug, Clone)]
struct JobRow {
    image_url: String,
    status: JobStatus,
    error: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    predictions: Vec<StoredPrediction>,
}

#[derive(Default)]
pub struct InMemoryResultRepository {
    jobs: Mutex<HashMap<String, JobRow>>,
    failures_remaining: AtomicU32,
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` write or read calls fail as if the database were down.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of job rows currently stored.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|row| row.status == status)
            .count()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RepositoryError::Unavailable(
                "simulated database outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn create_pending(&self, job_id: &str, image_url: &str) -> Result<(), RepositoryError> {
        self.check_available()?;
        self.jobs
            .lock()
            .entry(job_id.to_string())
            .or_insert_with(|| JobRow {
                image_url: image_url.to_string(),
                status: JobStatus::Pending,
                error: None,
                processed_at: None,
                created_at: Utc::now(),
                predictions: Vec::new(),
            });
        Ok(())
    }

    async fn upsert(&self, result: &JobResult) -> Result<(), RepositoryError> {
        self.check_available()?;

        let now = Utc::now();
        let mut predictions: Vec<StoredPrediction> = result
            .predictions
            .iter()
            .map(|p| StoredPrediction {
                id: Uuid::new_v4(),
                prediction: p.clone(),
                created_at: now,
            })
            .collect();
        // Same order the Postgres read returns.
        predictions.sort_by(|a, b| b.prediction.confidence.total_cmp(&a.prediction.confidence));

        let mut jobs = self.jobs.lock();
        let row = jobs.entry(result.job_id.clone()).or_insert_with(|| JobRow {
            image_url: result.image_url.clone(),
            status: result.status,
            error: None,
            processed_at: None,
            created_at: now,
            predictions: Vec::new(),
        });
        row.status = result.status;
        row.error = result.error.clone();
        row.processed_at = Some(result.processed_at);
        row.predictions = predictions;
        Ok(())
    }

    async fn mark_failed_if_not_terminal(
        &self,
        job_id: &str,
        image_url: &str,
        reason: &str,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;

        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let row = jobs.entry(job_id.to_string()).or_insert_with(|| JobRow {
            image_url: image_url.to_string(),
            status: JobStatus::Pending,
            error: None,
            processed_at: None,
            created_at: now,
            predictions: Vec::new(),
        });
        if row.status.is_terminal() {
            return Ok(false);
        }
        row.status = JobStatus::Failed;
        row.error = Some(reason.to_string());
        row.processed_at = Some(now);
        Ok(true)
    }

    async fn get_by_id(&self, job_id: &str) -> Result<Option<JobView>, RepositoryError> {
        self.check_available()?;
        Ok(self.jobs.lock().get(job_id).map(|row| JobView {
            job_id: job_id.to_string(),
            image_url: row.image_url.clone(),
            status: row.status,
            error: row.error.clone(),
            processed_at: row.processed_at,
            created_at: row.created_at,
            predictions: row.predictions.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
