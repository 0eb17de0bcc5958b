//! Queue consumer that turns a delivered job into a persisted, delivered
//! result.
//!
//! Every delivery walks `Delivered → Fetching → Inferring → Persisting →
//! Notifying → Acknowledged`, or ends in `Abandoned`. The queue only
//! guarantees at-least-once delivery, so the record store lookup at the start
//! of each delivery makes replays skip straight to notification, and the
//! message is acknowledged only after the result is durable.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::job::{JobDescriptor, JobResult, JobStage, QueueMessage, ReceiptHandle};

use super::detector::Detector;
use super::notifier::Notifier;
use super::queue::{QueueError, TaskQueue};
use super::records::{InsertOutcome, RecordStore};
use super::storage::{BlobStore, StorageError};

/// Pause after a failed poll before asking the queue again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages claimed per poll.
    pub max_messages: usize,
    /// Long-poll wait when the queue is empty.
    pub poll_wait: Duration,
    /// Visibility granted per heartbeat to every message of a claimed batch
    /// that is not finished yet.
    pub visibility_timeout: Duration,
    /// Failed inferences allowed per job before it is abandoned. Counted in
    /// the record store, so redeliveries for other reasons do not use it up.
    pub max_inference_attempts: u32,
    /// How long a released message stays hidden before redelivery.
    pub retry_delay: Duration,
    /// Record store reads before treating a job as not yet completed.
    pub lookup_attempts: u32,
    pub lookup_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_messages: 1,
            poll_wait: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(120),
            max_inference_attempts: 3,
            retry_delay: Duration::from_secs(5),
            lookup_attempts: 1,
            lookup_backoff: Duration::from_millis(200),
        }
    }
}

/// What became of a single delivery.
#[derive(Debug)]
pub enum Disposition {
    /// The result is durable, notification was attempted, and the message
    /// was acknowledged. `replayed` is set when the result already existed.
    Completed { job_id: Uuid, replayed: bool },
    /// Terminal failure; the message was acknowledged and will not return.
    Abandoned(PipelineError),
    /// Left on the queue so a later delivery can try again.
    Released(PipelineError),
}

enum Failure {
    Transient(PipelineError),
    Fatal(PipelineError),
}

pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    detector: Arc<dyn Detector>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        detector: Arc<dyn Detector>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            storage,
            records,
            detector,
            notifier,
            config,
        }
    }

    /// Poll and process until `shutdown` is set to `true` (or its sender is
    /// dropped). A message already being processed is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_messages = self.config.max_messages,
            poll_wait_secs = self.config.poll_wait.as_secs(),
            "Worker loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.queue.poll(self.config.max_messages, self.config.poll_wait) => polled,
            };

            match polled {
                Ok(messages) => {
                    self.process_batch(messages).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue poll failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// Poll once and process whatever arrived.
    pub async fn poll_once(&self) -> Result<Vec<Disposition>, QueueError> {
        let messages = self
            .queue
            .poll(self.config.max_messages, self.config.poll_wait)
            .await?;
        Ok(self.process_batch(messages).await)
    }

    /// Handle a claimed batch one message at a time.
    ///
    /// Every half visibility timeout, the visibility of each message not
    /// finished yet is extended, including those still waiting their turn.
    async fn process_batch(&self, messages: Vec<QueueMessage>) -> Vec<Disposition> {
        let outstanding: Mutex<Vec<ReceiptHandle>> =
            Mutex::new(messages.iter().map(|m| m.receipt.clone()).collect());

        let work = async {
            let mut dispositions = Vec::with_capacity(messages.len());
            for message in messages {
                let receipt = message.receipt.clone();
                dispositions.push(self.handle(message).await);
                outstanding.lock().await.retain(|r| r != &receipt);
            }
            dispositions
        };

        let period = self.config.visibility_timeout / 2;
        if period.is_zero() {
            return work.await;
        }

        tokio::pin!(work);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                dispositions = &mut work => return dispositions,
                _ = heartbeat.tick() => {
                    let receipts = outstanding.lock().await.clone();
                    for receipt in &receipts {
                        if let Err(e) = self
                            .queue
                            .extend_visibility(receipt, self.config.visibility_timeout)
                            .await
                        {
                            tracing::warn!(error = %e, "Visibility heartbeat failed");
                        }
                    }
                }
            }
        }
    }

    /// Process one delivery end to end. Never panics and never returns an
    /// error: every failure is scoped to this message.
    async fn handle(&self, message: QueueMessage) -> Disposition {
        let started = Instant::now();

        let descriptor = match message.descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let err = PipelineError::PoisonMessage(e.to_string());
                tracing::error!(
                    receive_count = message.receive_count,
                    body_len = message.body.len(),
                    error = %err,
                    "Discarding malformed queue message"
                );
                self.acknowledge(None, &message).await;
                metrics::counter!("jobs_abandoned_total", "reason" => err.kind()).increment(1);
                return Disposition::Abandoned(err);
            }
        };
        let job_id = descriptor.job_id;
        stage(job_id, JobStage::Delivered);

        let disposition = match self.process(&descriptor).await {
            Ok(replayed) => {
                self.acknowledge(Some(job_id), &message).await;
                stage(job_id, JobStage::Acknowledged);
                if replayed {
                    metrics::counter!("jobs_replayed_total").increment(1);
                } else {
                    metrics::counter!("jobs_completed_total").increment(1);
                }
                Disposition::Completed { job_id, replayed }
            }
            Err(Failure::Transient(err)) => {
                tracing::warn!(
                    job_id = %job_id,
                    receive_count = message.receive_count,
                    retry_in_secs = self.config.retry_delay.as_secs(),
                    error = %err,
                    "Returning job to the queue for another attempt"
                );
                if let Err(e) = self
                    .queue
                    .extend_visibility(&message.receipt, self.config.retry_delay)
                    .await
                {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Could not reschedule delivery, waiting for visibility timeout"
                    );
                }
                metrics::counter!("jobs_retried_total", "reason" => err.kind()).increment(1);
                Disposition::Released(err)
            }
            Err(Failure::Fatal(err)) => {
                stage(job_id, JobStage::Abandoned);
                tracing::error!(
                    job_id = %job_id,
                    chat_id = %descriptor.origin_chat_id,
                    reason = err.kind(),
                    error = %err,
                    "Abandoning job"
                );
                if let Err(e) = self
                    .notifier
                    .notify_failure(job_id, &descriptor.origin_chat_id, &err.user_message())
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "Failure notice not delivered");
                }
                self.acknowledge(Some(job_id), &message).await;
                metrics::counter!("jobs_abandoned_total", "reason" => err.kind()).increment(1);
                Disposition::Abandoned(err)
            }
        };

        metrics::histogram!("job_processing_seconds").record(started.elapsed().as_secs_f64());
        disposition
    }

    /// Returns `Ok(true)` when an existing result was replayed instead of
    /// running inference.
    async fn process(&self, descriptor: &JobDescriptor) -> Result<bool, Failure> {
        let job_id = descriptor.job_id;

        if let Some(existing) = self.find_existing(job_id).await.map_err(Failure::Transient)? {
            tracing::info!(job_id = %job_id, "Result already persisted, replaying notification");
            self.deliver(&existing).await;
            return Ok(true);
        }

        stage(job_id, JobStage::Fetching);
        let image = match self.storage.get(&descriptor.image_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(Failure::Fatal(PipelineError::DataLost {
                    job_id,
                    image_key: descriptor.image_key.clone(),
                }));
            }
            Err(StorageError::Corrupt(detail)) => {
                tracing::error!(
                    job_id = %job_id,
                    image_key = %descriptor.image_key,
                    reason = "corrupt_blob",
                    error = %detail,
                    "Stored photo could not be decoded, check ENCRYPTION_KEY on gateway and worker"
                );
                metrics::counter!("blobs_corrupt_total").increment(1);
                return Err(Failure::Fatal(PipelineError::DataLost {
                    job_id,
                    image_key: descriptor.image_key.clone(),
                }));
            }
            Err(e) => {
                return Err(Failure::Transient(PipelineError::StorageUnavailable(
                    e.to_string(),
                )))
            }
        };

        stage(job_id, JobStage::Inferring);
        let inference_started = Instant::now();
        let detections = match self.detector.detect(&image).await {
            Ok(detections) => detections,
            Err(e) => {
                let attempts = self
                    .records
                    .record_inference_failure(job_id)
                    .await
                    .map_err(|re| {
                        Failure::Transient(PipelineError::StorageUnavailable(re.to_string()))
                    })?;
                let err = PipelineError::InferenceFailed {
                    job_id,
                    attempts,
                    reason: e.to_string(),
                };
                return Err(if attempts >= self.config.max_inference_attempts {
                    Failure::Fatal(err)
                } else {
                    Failure::Transient(err)
                });
            }
        };
        tracing::info!(
            job_id = %job_id,
            inference_ms = inference_started.elapsed().as_millis() as u64,
            detections = detections.len(),
            "Inference complete"
        );

        stage(job_id, JobStage::Persisting);
        let result = JobResult::new(descriptor, detections);
        let stored = match self.records.insert(&result).await {
            Ok(InsertOutcome::Inserted) => result,
            Ok(InsertOutcome::Duplicate) => {
                // another delivery persisted first; notify with what it stored
                tracing::warn!(job_id = %job_id, "Result persisted concurrently, using stored copy");
                match self.find_existing(job_id).await.map_err(Failure::Transient)? {
                    Some(existing) => existing,
                    None => result,
                }
            }
            Err(e) => {
                return Err(Failure::Transient(PipelineError::StorageUnavailable(
                    e.to_string(),
                )))
            }
        };

        self.deliver(&stored).await;
        Ok(false)
    }

    /// Record store lookup that treats "not found" as "not completed yet",
    /// re-reading a few times when configured for eventually consistent
    /// stores.
    async fn find_existing(&self, job_id: Uuid) -> Result<Option<JobResult>, PipelineError> {
        let attempts = self.config.lookup_attempts.max(1);
        for attempt in 1..=attempts {
            match self.records.find_by_job_id(job_id).await {
                Ok(Some(result)) => return Ok(Some(result)),
                Ok(None) if attempt < attempts => sleep(self.config.lookup_backoff).await,
                Ok(None) => return Ok(None),
                Err(e) => return Err(PipelineError::StorageUnavailable(e.to_string())),
            }
        }
        Ok(None)
    }

    /// Push the result to the gateway. Failures are logged only: the result
    /// is already durable and can be pulled by `job_id`.
    async fn deliver(&self, result: &JobResult) {
        stage(result.job_id, JobStage::Notifying);
        if let Err(e) = self
            .notifier
            .notify(result.job_id, &result.origin_chat_id, &result.detections)
            .await
        {
            let err = PipelineError::NotifyFailed {
                job_id: result.job_id,
                reason: e.to_string(),
            };
            tracing::error!(job_id = %result.job_id, error = %err, "Result notification failed");
            metrics::counter!("notifications_failed_total").increment(1);
        }
    }

    async fn acknowledge(&self, job_id: Option<Uuid>, message: &QueueMessage) {
        if let Err(e) = self.queue.acknowledge(&message.receipt).await {
            match job_id {
                Some(job_id) => tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Acknowledge failed, message will be redelivered and replayed"
                ),
                None => tracing::warn!(error = %e, "Acknowledge of malformed message failed"),
            }
        }
    }
}

fn stage(job_id: Uuid, stage: JobStage) {
    tracing::debug!(job_id = %job_id, stage = %stage, "Job stage");
}
