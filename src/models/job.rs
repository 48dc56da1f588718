use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::prediction::{Prediction, StoredPrediction};

/// Persisted lifecycle state of a detection job.
///
/// `processing` is never written: a job is in flight while a worker holds its
/// queue message, and the row stays `pending` (or absent) until a terminal
/// write lands.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Terminal outcome of one job, written atomically by the result repository.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub image_url: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub predictions: Vec<Prediction>,
}

impl JobResult {
    pub fn completed(job_id: &str, image_url: &str, predictions: Vec<Prediction>) -> Self {
        Self {
            job_id: job_id.to_string(),
            image_url: image_url.to_string(),
            status: JobStatus::Completed,
            error: None,
            processed_at: Utc::now(),
            predictions,
        }
    }

    pub fn failed(job_id: &str, image_url: &str, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            image_url: image_url.to_string(),
            status: JobStatus::Failed,
            error: Some(reason.into()),
            processed_at: Utc::now(),
            predictions: Vec::new(),
        }
    }
}

/// Caller-facing snapshot of a job and its predictions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub job_id: String,
    pub image_url: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub predictions: Vec<StoredPrediction>,
}
