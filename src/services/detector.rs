use async_trait::async_trait;
use garde::Validate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::models::detection::{BoundingBox, Detection};

const DETECTION_MODEL: &str = "@cf/facebook/detr-resnet-50";

/// Object detection model, treated as `infer(image) -> detections`.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError>;
}

/// Client for the Cloudflare Workers AI object detection model.
pub struct WorkersAiDetector {
    http: Client,
    url: String,
    api_token: String,
    min_confidence: f32,
}

#[derive(Deserialize)]
struct DetrResponse {
    result: Vec<DetrObject>,
}

#[derive(Deserialize)]
struct DetrObject {
    label: String,
    score: f32,
    #[serde(rename = "box")]
    bbox: DetrBox,
}

#[derive(Deserialize)]
struct DetrBox {
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

impl WorkersAiDetector {
    pub fn new(account_id: &str, api_token: &str, min_confidence: f32) -> Self {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            account_id, DETECTION_MODEL
        );
        Self::with_url(url, api_token, min_confidence)
    }

    /// Point the client at an arbitrary endpoint speaking the same protocol.
    pub fn with_url(url: String, api_token: &str, min_confidence: f32) -> Self {
        Self {
            http: Client::new(),
            url,
            api_token: api_token.to_string(),
            min_confidence,
        }
    }
}

#[async_trait]
impl Detector for WorkersAiDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        image::guess_format(image)
            .map_err(|e| DetectorError::InvalidImage(format!("unrecognised image data: {}", e)))?;

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| DetectorError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let detr: DetrResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::ModelUnavailable(format!("unexpected response: {}", e)))?;

        Ok(into_detections(detr.result, self.min_confidence))
    }
}

fn classify_status(status: StatusCode, body: String) -> DetectorError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        DetectorError::InvalidImage(format!("model rejected image ({}): {}", status, body))
    } else {
        DetectorError::ModelUnavailable(format!("model returned {}: {}", status, body))
    }
}

/// Convert raw model output into validated detections, highest confidence
/// first. Objects below `min_confidence` or failing validation are dropped.
fn into_detections(objects: Vec<DetrObject>, min_confidence: f32) -> Vec<Detection> {
    let mut detections: Vec<Detection> = objects
        .into_iter()
        .map(|o| Detection {
            label: o.label,
            confidence: o.score,
            bbox: BoundingBox {
                x0: o.bbox.xmin,
                y0: o.bbox.ymin,
                x1: o.bbox.xmax,
                y1: o.bbox.ymax,
            },
        })
        .filter(|d| match d.validate() {
            Ok(()) => true,
            Err(report) => {
                tracing::warn!(label = %d.label, error = %report, "Dropping invalid detection");
                false
            }
        })
        .filter(|d| d.confidence >= min_confidence)
        .collect();

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Detection model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}
