//! Durable job queue: producer and consumer capabilities.
//!
//! Delivery is at-least-once. A consumer holds each delivery until it is
//! acknowledged, requeued or dead-lettered; anything held by a consumer that
//! dies is handed out again after [`JobConsumer::recover_in_flight`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod memory;
pub mod redis;

/// Job message body as carried on the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub job_id: String,
    pub image_url: String,
}

impl JobMessage {
    pub fn new(job_id: &str, image_url: &str) -> Result<Self, QueueError> {
        let message = Self {
            job_id: job_id.to_string(),
            image_url: image_url.to_string(),
        };
        message.check()?;
        Ok(message)
    }

    /// Decode a message body; malformed bodies can never succeed.
    pub fn decode(body: &str) -> Result<Self, QueueError> {
        let message: JobMessage = serde_json::from_str(body)?;
        message.check()?;
        Ok(message)
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.job_id.trim().is_empty() {
            return Err(QueueError::InvalidMessage("job_id is empty".to_string()));
        }
        if self.image_url.trim().is_empty() {
            return Err(QueueError::InvalidMessage("image_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Broker-side wrapper around a message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation key; always the job identifier.
    pub correlation_id: String,
    /// Deliveries that ended in a transient failure so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub body: String,
}

impl Envelope {
    pub fn wrap(message: &JobMessage) -> Result<Self, QueueError> {
        Ok(Self {
            correlation_id: message.job_id.clone(),
            attempts: 0,
            enqueued_at: Utc::now(),
            last_error: None,
            body: serde_json::to_string(message)?,
        })
    }

    /// Copy of this envelope recording one more failed attempt.
    pub fn retried(&self, reason: &str) -> Self {
        Self {
            attempts: self.attempts + 1,
            enqueued_at: Utc::now(),
            last_error: Some(reason.to_string()),
            ..self.clone()
        }
    }
}

/// One delivery handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Exact stored payload; identifies the delivery for settlement.
    pub raw: String,
    pub correlation_id: Option<String>,
    pub attempts: u32,
    pub body: String,
}

impl Delivery {
    /// An unreadable envelope still yields a delivery so it can be dropped.
    pub fn from_raw(raw: String) -> Self {
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Self {
                correlation_id: Some(envelope.correlation_id),
                attempts: envelope.attempts,
                body: envelope.body,
                raw,
            },
            Err(_) => Self {
                correlation_id: None,
                attempts: 0,
                body: raw.clone(),
                raw,
            },
        }
    }

    /// Envelope to write back when requeueing or dead-lettering.
    pub fn envelope(&self) -> Envelope {
        serde_json::from_str(&self.raw).unwrap_or_else(|_| Envelope {
            correlation_id: self.correlation_id.clone().unwrap_or_default(),
            attempts: self.attempts,
            enqueued_at: Utc::now(),
            last_error: None,
            body: self.body.clone(),
        })
    }
}

/// Publishes job messages onto the durable queue.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Durably enqueue one job. Broker errors are returned as-is; no retry.
    async fn publish(&self, job_id: &str, image_url: &str) -> Result<(), QueueError>;

    /// Check broker connectivity.
    async fn health_check(&self) -> Result<(), QueueError>;

    /// Number of messages waiting for a consumer.
    async fn queue_depth(&self) -> Result<u64, QueueError>;
}

/// Acknowledgement-gated subscription to the job queue.
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Wait up to `wait` for the next delivery.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Settle a delivery as done; it will not be delivered again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return a delivery to the queue with its attempt count incremented.
    async fn requeue(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Move a delivery to the dead-letter queue.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Put back deliveries this consumer held when it last stopped.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid job message: {0}")]
    InvalidMessage(String),

    #[error("Queue closed")]
    Closed,
}
