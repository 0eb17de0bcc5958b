use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::JobResult;

/// Outcome of inserting a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A result for this `job_id` already exists; nothing was written.
    Duplicate,
}

/// Append-only store of completed job results, addressable by `job_id`.
///
/// Implementations must never overwrite an existing record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, result: &JobResult) -> Result<InsertOutcome, RecordError>;

    async fn find_by_job_id(&self, job_id: Uuid) -> Result<Option<JobResult>, RecordError>;

    /// Count one more failed inference for `job_id` and return the total so
    /// far. Only inference failures are counted, not redeliveries.
    async fn record_inference_failure(&self, job_id: Uuid) -> Result<u32, RecordError>;

    async fn health_check(&self) -> Result<(), RecordError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}
