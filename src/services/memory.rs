//! In-process adapters for local runs and tests.
//!
//! They follow the same contracts as the Redis/Postgres/S3 adapters,
//! including visibility timeouts and redelivery on the task queue.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{JobResult, QueueMessage, ReceiptHandle};

use super::queue::{QueueError, TaskQueue};
use super::records::{InsertOutcome, RecordError, RecordStore};
use super::storage::{BlobStore, StorageError};

/// Upper bound on a single wait inside a long-poll, so expired
/// visibilities are noticed without an enqueue wakeup.
const RECHECK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    results: RwLock<HashMap<Uuid, JobResult>>,
    inference_failures: Mutex<HashMap<Uuid, u32>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, result: &JobResult) -> Result<InsertOutcome, RecordError> {
        let mut results = self.results.write().await;
        if results.contains_key(&result.job_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        results.insert(result.job_id, result.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_job_id(&self, job_id: Uuid) -> Result<Option<JobResult>, RecordError> {
        Ok(self.results.read().await.get(&job_id).cloned())
    }

    async fn record_inference_failure(&self, job_id: Uuid) -> Result<u32, RecordError> {
        let mut failures = self.inference_failures.lock().await;
        let count = failures.entry(job_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

struct StoredMessage {
    body: String,
    receive_count: u32,
}

struct InFlight {
    message_id: Uuid,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    messages: HashMap<Uuid, StoredMessage>,
    in_flight: HashMap<ReceiptHandle, InFlight>,
}

impl QueueState {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<ReceiptHandle> = self
            .in_flight
            .iter()
            .filter(|(_, delivery)| delivery.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(delivery) = self.in_flight.remove(&receipt) {
                if self.messages.contains_key(&delivery.message_id) {
                    self.pending.push_front(delivery.message_id);
                }
            }
        }
    }

    fn claim(&mut self, max_messages: usize, visible_at: Instant) -> Vec<QueueMessage> {
        let mut claimed = Vec::new();
        while claimed.len() < max_messages {
            let Some(message_id) = self.pending.pop_front() else {
                break;
            };
            let Some(stored) = self.messages.get_mut(&message_id) else {
                continue;
            };
            stored.receive_count += 1;
            let receipt = ReceiptHandle::new(Uuid::new_v4().to_string());
            self.in_flight.insert(
                receipt.clone(),
                InFlight {
                    message_id,
                    visible_at,
                },
            );
            claimed.push(QueueMessage {
                receipt,
                body: stored.body.clone(),
                receive_count: stored.receive_count,
            });
        }
        claimed
    }
}

/// In-process task queue with visibility timeouts and redelivery.
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    visibility_timeout: Duration,
    arrivals: Notify,
}

impl MemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            visibility_timeout,
            arrivals: Notify::new(),
        }
    }

    /// Messages not yet acknowledged, whether pending or in flight.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.messages.is_empty()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue_raw(&self, body: String) -> Result<(), QueueError> {
        let message_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            state.messages.insert(
                message_id,
                StoredMessage {
                    body,
                    receive_count: 0,
                },
            );
            state.pending.push_back(message_id);
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn poll(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.reclaim_expired(now);
                let claimed = state.claim(max_messages.max(1), now + self.visibility_timeout);
                if !claimed.is_empty() {
                    return Ok(claimed);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let nap = (deadline - now).min(RECHECK_INTERVAL);
            let _ = tokio::time::timeout(nap, self.arrivals.notified()).await;
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let delivery = state
            .in_flight
            .remove(receipt)
            .ok_or(QueueError::UnknownReceipt)?;
        state.messages.remove(&delivery.message_id);
        Ok(())
    }

    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        visibility: Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let delivery = state
            .in_flight
            .get_mut(receipt)
            .ok_or(QueueError::UnknownReceipt)?;
        delivery.visible_at = Instant::now() + visibility;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }
}
