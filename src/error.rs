//! Failure classification for the job pipeline.
//!
//! Adapter errors (`StorageError`, `QueueError`, ...) describe what went wrong
//! at a boundary; [`PipelineError`] says what the pipeline does about it.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Blob or record storage could not complete an operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The task queue rejected or could not accept an operation.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Message body is not a valid job descriptor. Never retried.
    #[error("poison message: {0}")]
    PoisonMessage(String),

    /// The source image for a job is gone from blob storage. Never retried.
    #[error("image for job {job_id} is missing from blob storage (key {image_key})")]
    DataLost { job_id: Uuid, image_key: String },

    /// Inference kept failing after the retry bound.
    #[error("inference failed for job {job_id} after {attempts} attempts: {reason}")]
    InferenceFailed {
        job_id: Uuid,
        attempts: u32,
        reason: String,
    },

    /// The result could not be pushed to the gateway. Logged only.
    #[error("notification failed for job {job_id}: {reason}")]
    NotifyFailed { job_id: Uuid, reason: String },
}

impl PipelineError {
    /// Short, stable label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::StorageUnavailable(_) => "storage_unavailable",
            PipelineError::QueueUnavailable(_) => "queue_unavailable",
            PipelineError::PoisonMessage(_) => "poison_message",
            PipelineError::DataLost { .. } => "data_lost",
            PipelineError::InferenceFailed { .. } => "inference_failed",
            PipelineError::NotifyFailed { .. } => "notify_failed",
        }
    }

    /// Text shown to the end user when a job is abandoned.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::DataLost { .. } => {
                "Sorry, your photo could not be found anymore. Please send it again.".to_string()
            }
            PipelineError::InferenceFailed { .. } => {
                "Sorry, we could not analyze your photo. Please try another image.".to_string()
            }
            _ => "Sorry, something went wrong while processing your photo.".to_string(),
        }
    }
}
