use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::detection::Detection;

/// The unit of work placed on the task queue.
///
/// `job_id` is generated by the submitter before any I/O and is the only
/// identity shared between components. Descriptors are never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: Uuid,
    pub image_key: String,
    pub origin_chat_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(job_id: Uuid, image_key: String, origin_chat_id: String) -> Self {
        Self {
            job_id,
            image_key,
            origin_chat_id,
            submitted_at: Utc::now(),
        }
    }
}

/// Durable record of a completed job. At most one exists per `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub origin_chat_id: String,
    pub detections: Vec<Detection>,
    pub created_at: DateTime<Utc>,
}

impl JobResult {
    pub fn new(descriptor: &JobDescriptor, detections: Vec<Detection>) -> Self {
        Self {
            job_id: descriptor.job_id,
            origin_chat_id: descriptor.origin_chat_id.clone(),
            detections,
            created_at: Utc::now(),
        }
    }
}

/// Opaque per-delivery token issued by the task queue.
///
/// Valid only for the delivery it came with. It is deliberately not
/// `Display` and its `Debug` output is redacted so it never ends up in logs
/// in place of a `job_id`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReceiptHandle(..)")
    }
}

/// A single delivery of a queued message.
///
/// `body` is the raw payload; it is only turned into a [`JobDescriptor`] by
/// the worker so that malformed content can be classified as poison.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: ReceiptHandle,
    pub body: String,
    /// Number of times this message has been delivered, including this one.
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn descriptor(&self) -> Result<JobDescriptor, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Per-delivery processing stage inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStage {
    Delivered,
    Fetching,
    Inferring,
    Persisting,
    Notifying,
    Acknowledged,
    Abandoned,
}
