use std::sync::Arc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::job::JobDescriptor;

use super::queue::TaskQueue;
use super::storage::BlobStore;

/// Gateway-side half of the pipeline: stores the photo and enqueues a job.
pub struct Submitter {
    storage: Arc<dyn BlobStore>,
    queue: Arc<dyn TaskQueue>,
}

impl Submitter {
    pub fn new(storage: Arc<dyn BlobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { storage, queue }
    }

    /// Upload `photo` and enqueue a job for it, returning the new `job_id`.
    ///
    /// The job is only enqueued once the upload has succeeded. If the
    /// enqueue fails the upload is removed again, so a failed submission
    /// leaves nothing behind that looks like work in progress.
    pub async fn submit(&self, photo: &[u8], origin_chat_id: &str) -> Result<Uuid, PipelineError> {
        let job_id = Uuid::new_v4();
        let image_key = image_key(origin_chat_id, job_id);

        self.storage.put(&image_key, photo).await.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Photo upload failed");
            PipelineError::StorageUnavailable(e.to_string())
        })?;

        let descriptor = JobDescriptor::new(job_id, image_key, origin_chat_id.to_string());

        if let Err(e) = self.queue.enqueue(&descriptor).await {
            tracing::error!(job_id = %job_id, error = %e, "Enqueue failed, discarding upload");
            if let Err(cleanup) = self.storage.delete(&descriptor.image_key).await {
                tracing::warn!(
                    job_id = %job_id,
                    error = %cleanup,
                    "Could not remove orphaned upload"
                );
            }
            return Err(PipelineError::QueueUnavailable(e.to_string()));
        }

        metrics::counter!("jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            chat_id = %origin_chat_id,
            bytes = photo.len(),
            "Job submitted"
        );

        Ok(job_id)
    }
}

/// Blob key for a submission. Chat ids are opaque, so anything outside a
/// conservative character set is replaced to keep keys path-safe.
pub fn image_key(origin_chat_id: &str, job_id: Uuid) -> String {
    let chat: String = origin_chat_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("photos/{}/{}", chat, job_id)
}
