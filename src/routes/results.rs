use axum::http::StatusCode;
use axum::Json;

use crate::models::api::{NotificationStatus, ResultNotification};
use crate::services::notifier::render_summary;

/// POST /results — receives pushed job outcomes from workers.
///
/// Renders the chat message for the originating conversation and hands it
/// to the chat transport, which lives outside this service; here that
/// boundary is the structured log line.
pub async fn receive_result(Json(notification): Json<ResultNotification>) -> StatusCode {
    let text = render_summary(&notification);

    match notification.status {
        NotificationStatus::Completed => {
            metrics::counter!("results_delivered_total").increment(1);
            tracing::info!(
                job_id = %notification.job_id,
                chat_id = %notification.chat_id,
                detections = notification.detections.len(),
                message = %text,
                "Delivering result to chat"
            );
        }
        NotificationStatus::Failed => {
            metrics::counter!("failures_delivered_total").increment(1);
            tracing::warn!(
                job_id = %notification.job_id,
                chat_id = %notification.chat_id,
                message = %text,
                "Delivering failure notice to chat"
            );
        }
    }

    StatusCode::OK
}
