use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ResultResponse, SubmitResponse};

/// POST /api/v1/jobs — upload a chat photo for object detection.
///
/// Multipart fields: `image` (the photo) and `chat_id` (originating
/// conversation).
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut chat_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        match field.name() {
            Some("image") => {
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                image_data = Some(data.to_vec());
            }
            Some("chat_id") => {
                let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                let text = text.trim();
                if !text.is_empty() {
                    chat_id = Some(text.to_string());
                }
            }
            _ => {}
        }
    }

    let image_data = image_data.ok_or(StatusCode::BAD_REQUEST)?;
    let chat_id = chat_id.ok_or(StatusCode::BAD_REQUEST)?;

    let job_id = state
        .submitter
        .submit(&image_data, &chat_id)
        .await
        .map_err(|e| {
            tracing::error!(chat_id = %chat_id, error = %e, "Submission failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: "queued".to_string(),
            message: "Photo received, detection in progress".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — pull the result of a completed job.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ResultResponse>, StatusCode> {
    let result = state
        .records
        .find_by_job_id(job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Result lookup failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ResultResponse {
        job_id,
        status: "completed".to_string(),
        result,
    }))
}
