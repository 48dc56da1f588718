//! Redis reliable-queue implementation.
//!
//! Producers `LPUSH` envelopes onto the queue list. A consumer moves one
//! envelope at a time into its own in-flight list with `BLMOVE`, and settles
//! it by removing it from there (ack), or by removing and pushing it back onto
//! the queue or the dead-letter list in one `MULTI` block.

use async_trait::async_trait;
use redis::{AsyncCommands, Direction};
use std::time::Duration;

use super::{Delivery, Envelope, JobConsumer, JobMessage, JobPublisher, QueueError};

/// Redis key layout for one named queue and consumer.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    ready: String,
    processing: String,
    dead: String,
}

impl QueueKeys {
    pub fn new(queue_name: &str, consumer_name: &str) -> Self {
        Self {
            ready: queue_name.to_string(),
            processing: format!("{queue_name}:processing:{consumer_name}"),
            dead: format!("{queue_name}:dead"),
        }
    }

    pub fn ready(&self) -> &str {
        &self.ready
    }

    pub fn processing(&self) -> &str {
        &self.processing
    }

    pub fn dead(&self) -> &str {
        &self.dead
    }
}

/// Redis-backed durable job queue.
pub struct RedisJobQueue {
    client: redis::Client,
    keys: QueueKeys,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, queue_name: &str, consumer_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            keys: QueueKeys::new(queue_name, consumer_name),
        })
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Number of dead-lettered messages.
    pub async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(self.keys.dead()).await?;
        Ok(depth)
    }

    async fn settle_into(
        &self,
        delivery: &Delivery,
        target: &str,
        envelope: &Envelope,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .lrem(self.keys.processing(), 1, &delivery.raw)
            .ignore()
            .lpush(target, &payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for RedisJobQueue {
    async fn publish(&self, job_id: &str, image_url: &str) -> Result<(), QueueError> {
        let message = JobMessage::new(job_id, image_url)?;
        let payload = serde_json::to_string(&Envelope::wrap(&message)?)?;

        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(self.keys.ready(), &payload).await?;

        tracing::debug!(job_id = %job_id, queue = %self.keys.ready(), "Job published");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(self.keys.ready()).await?;
        Ok(depth)
    }
}

#[async_trait]
impl JobConsumer for RedisJobQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .blmove(
                self.keys.ready(),
                self.keys.processing(),
                Direction::Right,
                Direction::Left,
                wait.as_secs_f64(),
            )
            .await?;
        Ok(raw.map(Delivery::from_raw))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.lrem::<_, _, ()>(self.keys.processing(), 1, &delivery.raw)
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let envelope = delivery.envelope().retried(reason);
        self.settle_into(delivery, self.keys.ready(), &envelope).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let envelope = delivery.envelope().retried(reason);
        self.settle_into(delivery, self.keys.dead(), &envelope).await
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let mut recovered = 0u64;
        loop {
            let moved: Option<String> = conn
                .lmove(
                    self.keys.processing(),
                    self.keys.ready(),
                    Direction::Right,
                    Direction::Right,
                )
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(
                count = recovered,
                queue = %self.keys.ready(),
                "Recovered in-flight deliveries from previous run"
            );
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = QueueKeys::new("detection_jobs", "worker-1");
        assert_eq!(keys.ready(), "detection_jobs");
        assert_eq!(keys.processing(), "detection_jobs:processing:worker-1");
        assert_eq!(keys.dead(), "detection_jobs:dead");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisJobQueue::new("not-a-url", "q", "w").is_err());
    }
}
