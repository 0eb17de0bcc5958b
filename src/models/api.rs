use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::detection::Detection;
use super::job::JobResult;

/// Response after submitting a photo for detection.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response for the pull query on a job's result.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub job_id: Uuid,
    pub status: String,
    pub result: JobResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
    Completed,
    Failed,
}

/// Payload pushed by the worker to the gateway's `/results` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotification {
    pub job_id: Uuid,
    pub chat_id: String,
    pub status: NotificationStatus,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultNotification {
    pub fn completed(job_id: Uuid, chat_id: &str, detections: &[Detection]) -> Self {
        Self {
            job_id,
            chat_id: chat_id.to_string(),
            status: NotificationStatus::Completed,
            detections: detections.to_vec(),
            error: None,
        }
    }

    pub fn failed(job_id: Uuid, chat_id: &str, reason: &str) -> Self {
        Self {
            job_id,
            chat_id: chat_id.to_string(),
            status: NotificationStatus::Failed,
            detections: Vec::new(),
            error: Some(reason.to_string()),
        }
    }
}
