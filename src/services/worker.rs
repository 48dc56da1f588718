//! Worker loop: consumes job deliveries, runs detection, persists outcomes.
//!
//! The worker is the single place that decides between acknowledging,
//! requeueing and dead-lettering. Lower layers only classify their errors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::AppConfig;
use crate::db::{RepositoryError, ResultRepository};
use crate::models::job::JobResult;
use crate::services::detection::{DetectError, Detector};
use crate::services::queue::{Delivery, JobConsumer, JobMessage, QueueError};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deliveries processed concurrently.
    pub concurrency: usize,

    /// Total deliveries of one message before it is dead-lettered.
    pub max_attempts: u32,

    /// Deadline for one detection call.
    pub detection_timeout: Duration,

    /// Pause before a transient failure is requeued.
    pub retry_delay: Duration,

    /// Longest wait for a delivery before checking for shutdown again.
    pub poll_timeout: Duration,

    /// How long shutdown waits for in-flight deliveries.
    pub shutdown_timeout: Duration,

    /// Tries per ack, requeue or dead-letter before the delivery is left held.
    pub settle_attempts: u32,

    /// Pause after the first failed settlement try; doubles on each retry.
    pub settle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            detection_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            settle_attempts: 3,
            settle_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            max_attempts: config.max_delivery_attempts.max(1),
            detection_timeout: config.detection_timeout(),
            retry_delay: config.retry_delay(),
            shutdown_timeout: config.shutdown_timeout(),
            ..Self::default()
        }
    }
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Predictions committed, message acknowledged.
    Completed,
    /// Detection rejected the input; `failed` committed, message acknowledged.
    Failed,
    /// Payload could never be processed; acknowledged and discarded.
    Dropped,
    /// Transient failure; message returned to the queue.
    Requeued,
    /// Retry budget exhausted; message moved to the dead-letter queue.
    DeadLettered,
    /// Requeue or dead-letter kept failing; the delivery stays held by this
    /// consumer until the loop recovers it.
    Unsettled,
}

/// Broker-side settlement of one delivery.
#[derive(Debug, Clone, Copy)]
enum Settlement<'a> {
    Ack,
    Requeue(&'a str),
    DeadLetter(&'a str),
}

impl Settlement<'_> {
    fn name(&self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Requeue(_) => "requeue",
            Settlement::DeadLetter(_) => "dead-letter",
        }
    }
}

/// Transient processing failure; the delivery may succeed later.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectError),

    #[error("Failed to persist result: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    unsettled: AtomicU64,
}

/// Snapshot of settled deliveries since start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub unsettled: u64,
}

#[derive(Clone)]
pub struct Worker {
    consumer: Arc<dyn JobConsumer>,
    detector: Arc<dyn Detector>,
    repository: Arc<dyn ResultRepository>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
    /// Set when a delivery could not be settled and is still held.
    needs_recovery: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        consumer: Arc<dyn JobConsumer>,
        detector: Arc<dyn Detector>,
        repository: Arc<dyn ResultRepository>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            consumer,
            detector,
            repository,
            config,
            shutdown_tx,
            counters: Arc::new(Counters::default()),
            needs_recovery: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the loop to stop taking deliveries. Safe to call before `run`.
    pub fn stop(&self) {
        info!("Stopping worker");
        self.shutdown_tx.send_replace(true);
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            unsettled: self.counters.unsettled.load(Ordering::Relaxed),
        }
    }

    /// Consume until [`Worker::stop`] is called, then drain in-flight work.
    ///
    /// Deliveries still running when the drain timeout expires are abandoned
    /// unacknowledged and handed out again on the next start.
    pub async fn run(&self) -> WorkerStats {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        if let Err(e) = self.consumer.recover_in_flight().await {
            error!(error = %e, "Failed to recover in-flight deliveries");
            self.needs_recovery.store(true, Ordering::SeqCst);
        }

        info!(
            concurrency = self.config.concurrency,
            max_attempts = self.config.max_attempts,
            "Worker started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Delivery task panicked");
                }
            }

            if self.needs_recovery.swap(false, Ordering::SeqCst) {
                // Running tasks still hold their deliveries in the same
                // in-flight list, so let them settle first.
                info!(in_flight = tasks.len(), "Waiting for in-flight deliveries before recovery");
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown_rx) => break,
                    _ = async {
                        while let Some(joined) = tasks.join_next().await {
                            if let Err(e) = joined {
                                error!(error = %e, "Delivery task panicked");
                            }
                        }
                    } => {}
                }

                match self.consumer.recover_in_flight().await {
                    Ok(recovered) => info!(recovered, "Recovered held deliveries"),
                    Err(e) => {
                        error!(error = %e, "Failed to recover held deliveries");
                        self.needs_recovery.store(true, Ordering::SeqCst);
                        tokio::select! {
                            _ = shutdown_requested(&mut shutdown_rx) => break,
                            _ = tokio::time::sleep(self.config.poll_timeout) => {}
                        }
                        continue;
                    }
                }
            }

            let permit = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                received = self.consumer.receive(self.config.poll_timeout) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let worker = self.clone();
                    let span = tracing::info_span!(
                        "job",
                        job_id = delivery.correlation_id.as_deref().unwrap_or("unknown"),
                        attempt = delivery.attempts + 1,
                    );
                    tasks.spawn(
                        async move {
                            worker.handle_delivery(delivery).await;
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    debug!("No deliveries available");
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive from queue");
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(self.config.poll_timeout) => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "Draining in-flight deliveries");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Delivery task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                abandoned = tasks.len(),
                "Shutdown timeout reached; abandoning unacknowledged deliveries"
            );
            tasks.abort_all();
        }

        let stats = self.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            unsettled = stats.unsettled,
            "Worker stopped"
        );
        stats
    }

    /// Process one delivery and settle it with the broker.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Outcome {
        let message = match JobMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %delivery.raw,
                    "Dropping malformed job message"
                );
                self.settle(&delivery, Settlement::Ack).await;
                return self.record(Outcome::Dropped);
            }
        };

        match self.process(&message).await {
            Ok(outcome) => {
                // The result is committed; a held delivery only causes a
                // redelivery that the upsert absorbs.
                self.settle(&delivery, Settlement::Ack).await;
                self.record(outcome)
            }
            Err(e) => {
                let outcome = self.retry_or_dead_letter(&delivery, &message, &e).await;
                self.record(outcome)
            }
        }
    }

    /// Run detection and commit the terminal result.
    async fn process(&self, message: &JobMessage) -> Result<Outcome, ProcessError> {
        let deadline = self.config.detection_timeout;
        let started = Instant::now();
        let detection = match tokio::time::timeout(
            deadline,
            self.detector.detect(&message.image_url, deadline),
        )
        .await
        {
            Ok(detection) => detection,
            Err(_) => Err(DetectError::Timeout(deadline)),
        };
        metrics::histogram!("detection_duration_seconds").record(started.elapsed().as_secs_f64());

        let (result, outcome) = match detection {
            Ok(predictions) => {
                info!(
                    job_id = %message.job_id,
                    predictions = predictions.len(),
                    detection_ms = started.elapsed().as_millis() as u64,
                    "Detection complete"
                );
                (
                    JobResult::completed(&message.job_id, &message.image_url, predictions),
                    Outcome::Completed,
                )
            }
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                warn!(job_id = %message.job_id, error = %e, "Detection rejected job");
                (
                    JobResult::failed(&message.job_id, &message.image_url, e.to_string()),
                    Outcome::Failed,
                )
            }
        };

        self.repository.upsert(&result).await?;
        Ok(outcome)
    }

    async fn retry_or_dead_letter(
        &self,
        delivery: &Delivery,
        message: &JobMessage,
        error: &ProcessError,
    ) -> Outcome {
        let attempt = delivery.attempts + 1;
        let reason = error.to_string();

        if attempt < self.config.max_attempts {
            warn!(
                job_id = %message.job_id,
                attempt,
                max_attempts = self.config.max_attempts,
                error = %reason,
                "Transient failure, requeueing"
            );
            tokio::time::sleep(self.config.retry_delay).await;
            return if self.settle(delivery, Settlement::Requeue(&reason)).await {
                Outcome::Requeued
            } else {
                Outcome::Unsettled
            };
        }

        error!(
            job_id = %message.job_id,
            attempt,
            error = %reason,
            "Retry budget exhausted, dead-lettering"
        );

        // A redelivery of a job that already committed must not demote it.
        match self
            .repository
            .mark_failed_if_not_terminal(
                &message.job_id,
                &message.image_url,
                &format!("retries exhausted after {attempt} attempts: {reason}"),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => info!(
                job_id = %message.job_id,
                "Job already terminal, keeping committed result"
            ),
            Err(e) => warn!(
                job_id = %message.job_id,
                error = %e,
                "Could not record exhausted job as failed"
            ),
        }

        if self.settle(delivery, Settlement::DeadLetter(&reason)).await {
            Outcome::DeadLettered
        } else {
            Outcome::Unsettled
        }
    }

    /// Apply a settlement, retrying with doubling backoff. When every try
    /// fails the delivery stays held and the loop schedules a recovery pass.
    async fn settle(&self, delivery: &Delivery, settlement: Settlement<'_>) -> bool {
        let attempts = self.config.settle_attempts.max(1);
        let mut backoff = self.config.settle_backoff;

        for attempt in 1..=attempts {
            let result: Result<(), QueueError> = match settlement {
                Settlement::Ack => self.consumer.ack(delivery).await,
                Settlement::Requeue(reason) => self.consumer.requeue(delivery, reason).await,
                Settlement::DeadLetter(reason) => self.consumer.dead_letter(delivery, reason).await,
            };

            match result {
                Ok(()) => return true,
                Err(e) if attempt < attempts => {
                    warn!(
                        action = settlement.name(),
                        attempt,
                        error = %e,
                        "Settlement failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    error!(
                        action = settlement.name(),
                        attempts,
                        error = %e,
                        "Settlement failed, delivery stays held until recovered"
                    );
                }
            }
        }

        self.needs_recovery.store(true, Ordering::SeqCst);
        false
    }

    fn record(&self, outcome: Outcome) -> Outcome {
        let (counter, metric) = match outcome {
            Outcome::Completed => (&self.counters.completed, "jobs_completed_total"),
            Outcome::Failed => (&self.counters.failed, "jobs_failed_total"),
            Outcome::Dropped => (&self.counters.dropped, "jobs_dropped_total"),
            Outcome::Requeued => (&self.counters.requeued, "jobs_requeued_total"),
            Outcome::DeadLettered => (&self.counters.dead_lettered, "jobs_dead_lettered_total"),
            Outcome::Unsettled => (&self.counters.unsettled, "jobs_unsettled_total"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric).increment(1);
        outcome
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
