//! Test doubles and drivers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vision_pipeline::db::memory::InMemoryResultRepository;
use vision_pipeline::models::prediction::Prediction;
use vision_pipeline::services::detection::{DetectError, Detector};
use vision_pipeline::services::queue::memory::InMemoryJobQueue;
use vision_pipeline::services::queue::JobConsumer;
use vision_pipeline::services::worker::{Outcome, Worker, WorkerConfig};

/// One scripted response of the fake detection service.
#[derive(Debug, Clone)]
pub enum Step {
    Detect(Vec<Prediction>),
    Status(u16),
    Malformed,
    Hang,
    Slow(Duration, Vec<Prediction>),
}

/// Detector that replays a script, then repeats a fallback step.
/// Images with a pinned step always get that step instead.
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    pinned: HashMap<String, Step>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            pinned: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn pin(mut self, image_url: &str, step: Step) -> Self {
        self.pinned.insert(image_url.to_string(), step);
        self
    }

    pub fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(
        &self,
        image_url: &str,
        _deadline: Duration,
    ) -> Result<Vec<Prediction>, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = match self.pinned.get(image_url) {
            Some(step) => step.clone(),
            None => self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone()),
        };

        match step {
            Step::Detect(predictions) => Ok(predictions),
            Step::Status(status) if status >= 500 => Err(DetectError::Unavailable {
                status,
                body: "service unavailable".to_string(),
            }),
            Step::Status(status) => Err(DetectError::Rejected {
                status,
                body: "bad request".to_string(),
            }),
            Step::Malformed => Err(DetectError::MalformedResponse("not json".to_string())),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Step::Slow(delay, predictions) => {
                tokio::time::sleep(delay).await;
                Ok(predictions)
            }
        }
    }
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        max_attempts: 3,
        detection_timeout: Duration::from_secs(5),
        retry_delay: Duration::ZERO,
        poll_timeout: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        settle_attempts: 3,
        settle_backoff: Duration::from_millis(1),
    }
}

pub struct Harness {
    pub queue: Arc<InMemoryJobQueue>,
    pub repository: Arc<InMemoryResultRepository>,
    pub detector: Arc<ScriptedDetector>,
    pub worker: Worker,
}

impl Harness {
    pub fn new(detector: ScriptedDetector) -> Self {
        Self::with_config(detector, test_config())
    }

    pub fn with_config(detector: ScriptedDetector, config: WorkerConfig) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new());
        let repository = Arc::new(InMemoryResultRepository::new());
        let detector = Arc::new(detector);
        let worker = Worker::new(
            queue.clone(),
            detector.clone(),
            repository.clone(),
            config,
        );
        Self {
            queue,
            repository,
            detector,
            worker,
        }
    }

    /// Deliver and settle messages one at a time until the queue is empty.
    pub async fn drain(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = self
            .queue
            .receive(Duration::from_millis(10))
            .await
            .expect("receive failed")
        {
            outcomes.push(self.worker.handle_delivery(delivery).await);
        }
        outcomes
    }
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
