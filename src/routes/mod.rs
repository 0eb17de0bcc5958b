use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod results;

/// Largest accepted photo upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Gateway API routes. `/metrics` is mounted separately by the binary since
/// it needs the process-wide Prometheus handle.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Ok" }))
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_result))
        .route("/results", post(results::receive_result))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
