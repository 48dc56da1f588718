//! In-process queue with the same settlement semantics as the Redis queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Delivery, Envelope, JobConsumer, JobMessage, JobPublisher, QueueError};

#[derive(Default)]
struct Lists {
    ready: VecDeque<String>,
    in_flight: Vec<String>,
    dead: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    lists: Mutex<Lists>,
    notify: Notify,
    acked: AtomicU64,
    unavailable: AtomicBool,
    settle_failures: AtomicU32,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arbitrary payload, bypassing envelope construction.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.lists.lock().ready.push_front(raw.into());
        self.notify.notify_one();
    }

    /// Simulate a broker outage for publish and receive.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` ack, requeue or dead-letter calls fail.
    pub fn fail_settlements(&self, count: u32) {
        self.settle_failures.store(count, Ordering::SeqCst);
    }

    pub fn ready_len(&self) -> usize {
        self.lists.lock().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lists.lock().in_flight.len()
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    /// Envelopes currently in the dead-letter list.
    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.lists
            .lock()
            .dead
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    /// Envelopes waiting in the ready list, oldest first.
    pub fn ready_envelopes(&self) -> Vec<Envelope> {
        self.lists
            .lock()
            .ready
            .iter()
            .rev()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn check_settle(&self) -> Result<(), QueueError> {
        let injected = self
            .settle_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn take_next(&self) -> Option<String> {
        let mut lists = self.lists.lock();
        let raw = lists.ready.pop_back()?;
        lists.in_flight.push(raw.clone());
        Some(raw)
    }

    fn remove_in_flight(lists: &mut Lists, raw: &str) -> bool {
        match lists.in_flight.iter().position(|r| r == raw) {
            Some(index) => {
                lists.in_flight.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobPublisher for InMemoryJobQueue {
    async fn publish(&self, job_id: &str, image_url: &str) -> Result<(), QueueError> {
        self.check_available()?;
        let message = JobMessage::new(job_id, image_url)?;
        let payload = serde_json::to_string(&Envelope::wrap(&message)?)?;
        self.push_raw(payload);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.ready_len() as u64)
    }
}

#[async_trait]
impl JobConsumer for InMemoryJobQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        self.check_available()?;
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(raw) = self.take_next() {
                return Ok(Some(Delivery::from_raw(raw)));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_settle()?;
        let mut lists = self.lists.lock();
        if Self::remove_in_flight(&mut lists, &delivery.raw) {
            self.acked.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.check_settle()?;
        let payload = serde_json::to_string(&delivery.envelope().retried(reason))?;
        {
            let mut lists = self.lists.lock();
            Self::remove_in_flight(&mut lists, &delivery.raw);
            lists.ready.push_front(payload);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.check_settle()?;
        let payload = serde_json::to_string(&delivery.envelope().retried(reason))?;
        let mut lists = self.lists.lock();
        Self::remove_in_flight(&mut lists, &delivery.raw);
        lists.dead.push(payload);
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let recovered = {
            let mut lists = self.lists.lock();
            let held: Vec<String> = lists.in_flight.drain(..).collect();
            let count = held.len() as u64;
            for raw in held {
                lists.ready.push_back(raw);
            }
            count
        };
        if recovered > 0 {
            self.notify.notify_one();
        }
        Ok(recovered)
    }
}
