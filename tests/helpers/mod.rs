//! Fault-injecting fakes and a wired-up in-memory pipeline for tests
#![allow(dead_code)]

use async_trait::async_trait;
use photobot_pipeline::{
    models::{
        api::ResultNotification,
        detection::{BoundingBox, Detection},
        job::{QueueMessage, ReceiptHandle},
    },
    services::{
        detector::{Detector, DetectorError},
        memory::{MemoryBlobStore, MemoryRecordStore, MemoryTaskQueue},
        notifier::{Notifier, NotifyError},
        queue::{QueueError, TaskQueue},
        records::{InsertOutcome, RecordError, RecordStore},
        storage::{BlobStore, StorageError},
        submitter::Submitter,
        worker::{Worker, WorkerConfig},
    },
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Visibility timeout used by the in-memory queue in tests.
pub const TEST_VISIBILITY: Duration = Duration::from_millis(150);

pub fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        max_messages: 10,
        poll_wait: Duration::from_secs(2),
        visibility_timeout: TEST_VISIBILITY,
        max_inference_attempts: 3,
        retry_delay: Duration::ZERO,
        lookup_attempts: 1,
        lookup_backoff: Duration::from_millis(1),
    }
}

/// Detector that labels each image with its own bytes, so different photos
/// produce distinguishable results. Photos starting with `EMPTY` yield no
/// detections.
pub struct ScriptedDetector {
    failures_remaining: AtomicU32,
    always_fail: bool,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            always_fail: false,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Succeeds, but only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failures_remaining: AtomicU32::new(0),
            always_fail: true,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.always_fail || injected {
            return Err(DetectorError::ModelUnavailable("model is loading".to_string()));
        }

        if image.starts_with(b"EMPTY") {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            label: String::from_utf8_lossy(image).to_lowercase(),
            confidence: 0.9,
            bbox: BoundingBox {
                x0: 1.0,
                y0: 2.0,
                x1: 30.0,
                y1: 40.0,
            },
        }])
    }
}

/// Notifier that remembers everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<ResultNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the attempt, then reports the endpoint as down.
    pub fn unreachable() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<ResultNotification> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, notification: ResultNotification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        if self.fail {
            Err(NotifyError::Unreachable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        detections: &[Detection],
    ) -> Result<(), NotifyError> {
        self.record(ResultNotification::completed(job_id, origin_chat_id, detections))
    }

    async fn notify_failure(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.record(ResultNotification::failed(job_id, origin_chat_id, reason))
    }
}

/// Blob store whose backend is down.
#[derive(Default)]
pub struct FailingBlobStore {
    puts: AtomicU32,
}

impl FailingBlobStore {
    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, _key: &str, _data: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("bucket unreachable".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Unavailable("bucket unreachable".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Task queue that refuses every enqueue.
pub struct OfflineQueue;

#[async_trait]
impl TaskQueue for OfflineQueue {
    async fn enqueue_raw(&self, _body: String) -> Result<(), QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }

    async fn poll(&self, _max: usize, _wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }

    async fn acknowledge(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }

    async fn extend_visibility(
        &self,
        _receipt: &ReceiptHandle,
        _visibility: Duration,
    ) -> Result<(), QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Err(QueueError::Protocol("queue offline".to_string()))
    }
}

/// Wraps a real queue but loses the first `drops` acknowledgements, as if
/// the worker died right after persisting.
pub struct LossyAckQueue {
    inner: Arc<MemoryTaskQueue>,
    drops_remaining: AtomicU32,
}

impl LossyAckQueue {
    pub fn new(inner: Arc<MemoryTaskQueue>, drops: u32) -> Self {
        Self {
            inner,
            drops_remaining: AtomicU32::new(drops),
        }
    }
}

#[async_trait]
impl TaskQueue for LossyAckQueue {
    async fn enqueue_raw(&self, body: String) -> Result<(), QueueError> {
        self.inner.enqueue_raw(body).await
    }

    async fn poll(&self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        self.inner.poll(max, wait).await
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let dropped = self
            .drops_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(QueueError::Protocol("connection reset".to_string()));
        }
        self.inner.acknowledge(receipt).await
    }

    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        visibility: Duration,
    ) -> Result<(), QueueError> {
        self.inner.extend_visibility(receipt, visibility).await
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.inner.depth().await
    }
}

/// Record store whose database is down.
pub struct UnavailableRecords;

#[async_trait]
impl RecordStore for UnavailableRecords {
    async fn insert(
        &self,
        _result: &photobot_pipeline::models::job::JobResult,
    ) -> Result<InsertOutcome, RecordError> {
        Err(RecordError::Unavailable("connection pool timed out".to_string()))
    }

    async fn find_by_job_id(
        &self,
        _job_id: Uuid,
    ) -> Result<Option<photobot_pipeline::models::job::JobResult>, RecordError> {
        Err(RecordError::Unavailable("connection pool timed out".to_string()))
    }

    async fn record_inference_failure(&self, _job_id: Uuid) -> Result<u32, RecordError> {
        Err(RecordError::Unavailable("connection pool timed out".to_string()))
    }

    async fn health_check(&self) -> Result<(), RecordError> {
        Err(RecordError::Unavailable("connection pool timed out".to_string()))
    }
}

/// In-memory blob store whose first `failures` reads report the bucket as
/// unreachable.
pub struct FlakyBlobStore {
    inner: MemoryBlobStore,
    failures_remaining: AtomicU32,
}

impl FlakyBlobStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Unavailable("bucket unreachable".to_string()));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

/// Eventually consistent view of a record store: the first `hidden_reads`
/// lookups miss even when the record exists.
pub struct LaggingRecords {
    pub inner: MemoryRecordStore,
    hidden_reads: AtomicU32,
    reads: AtomicU32,
}

impl LaggingRecords {
    pub fn new(hidden_reads: u32) -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            hidden_reads: AtomicU32::new(hidden_reads),
            reads: AtomicU32::new(0),
        }
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for LaggingRecords {
    async fn insert(
        &self,
        result: &photobot_pipeline::models::job::JobResult,
    ) -> Result<InsertOutcome, RecordError> {
        self.inner.insert(result).await
    }

    async fn find_by_job_id(
        &self,
        job_id: Uuid,
    ) -> Result<Option<photobot_pipeline::models::job::JobResult>, RecordError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let hidden = self
            .hidden_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        self.inner.find_by_job_id(job_id).await
    }

    async fn record_inference_failure(&self, job_id: Uuid) -> Result<u32, RecordError> {
        self.inner.record_inference_failure(job_id).await
    }
}

/// A detection distinct from anything [`ScriptedDetector`] produces.
pub fn stored_detection() -> Detection {
    Detection {
        label: "stored earlier".to_string(),
        confidence: 0.5,
        bbox: BoundingBox {
            x0: 0.0,
            y0: 0.0,
            x1: 10.0,
            y1: 10.0,
        },
    }
}

/// A complete pipeline on in-memory adapters.
pub struct Pipeline {
    pub queue: Arc<MemoryTaskQueue>,
    pub storage: Arc<MemoryBlobStore>,
    pub records: Arc<MemoryRecordStore>,
    pub detector: Arc<ScriptedDetector>,
    pub notifier: Arc<RecordingNotifier>,
    pub submitter: Submitter,
    pub worker: Arc<Worker>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with(ScriptedDetector::new(), RecordingNotifier::new())
    }

    pub fn with(detector: ScriptedDetector, notifier: RecordingNotifier) -> Self {
        let queue = Arc::new(MemoryTaskQueue::new(TEST_VISIBILITY));
        let storage = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let detector = Arc::new(detector);
        let notifier = Arc::new(notifier);

        let submitter = Submitter::new(storage.clone(), queue.clone());
        let worker = Arc::new(Worker::new(
            queue.clone(),
            storage.clone(),
            records.clone(),
            detector.clone(),
            notifier.clone(),
            test_worker_config(),
        ));

        Self {
            queue,
            storage,
            records,
            detector,
            notifier,
            submitter,
            worker,
        }
    }
}
