use async_trait::async_trait;
use reqwest::Client;
use std::fmt::Write;
use std::time::Duration;
use uuid::Uuid;

use crate::models::api::{NotificationStatus, ResultNotification};
use crate::models::detection::Detection;

/// Delivers job outcomes back to the originating conversation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        detections: &[Detection],
    ) -> Result<(), NotifyError>;

    /// Best-effort notice that a job was abandoned.
    async fn notify_failure(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        reason: &str,
    ) -> Result<(), NotifyError>;
}

/// Push mode: POSTs a [`ResultNotification`] to the gateway.
pub struct HttpNotifier {
    http: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    async fn push(&self, notification: &ResultNotification) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        detections: &[Detection],
    ) -> Result<(), NotifyError> {
        self.push(&ResultNotification::completed(job_id, origin_chat_id, detections))
            .await
    }

    async fn notify_failure(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.push(&ResultNotification::failed(job_id, origin_chat_id, reason))
            .await
    }
}

/// Pull mode: results stay in the record store until the gateway asks for
/// them, so there is nothing to push.
pub struct PullOnlyNotifier;

#[async_trait]
impl Notifier for PullOnlyNotifier {
    async fn notify(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        detections: &[Detection],
    ) -> Result<(), NotifyError> {
        tracing::info!(
            job_id = %job_id,
            chat_id = %origin_chat_id,
            detections = detections.len(),
            "Result ready for pull"
        );
        Ok(())
    }

    async fn notify_failure(
        &self,
        job_id: Uuid,
        origin_chat_id: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        tracing::warn!(job_id = %job_id, chat_id = %origin_chat_id, reason, "Job abandoned");
        Ok(())
    }
}

/// Chat message text for a notification.
pub fn render_summary(notification: &ResultNotification) -> String {
    let mut message = format!("Results for job {}:\n", notification.job_id);
    match notification.status {
        NotificationStatus::Failed => {
            message.push_str(
                notification
                    .error
                    .as_deref()
                    .unwrap_or("Processing failed."),
            );
        }
        NotificationStatus::Completed if notification.detections.is_empty() => {
            message.push_str("No objects detected.");
        }
        NotificationStatus::Completed => {
            message.push_str("\nDetected objects:\n");
            for (i, d) in notification.detections.iter().enumerate() {
                let _ = writeln!(message, "{}. {} ({:.0}%)", i + 1, d.label, d.confidence * 100.0);
            }
        }
    }
    message
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Notification endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notifier configuration error: {0}")]
    Config(String),
}
