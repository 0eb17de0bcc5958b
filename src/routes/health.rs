use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub record_store: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E>(started: Instant, outcome: Result<(), E>) -> Self {
        match outcome {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
                queue_depth: None,
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
                queue_depth: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health — dependency status of the gateway.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let record_store = ComponentHealth::from_check(started, state.records.health_check().await);

    let started = Instant::now();
    let mut queue = ComponentHealth::from_check(started, state.queue.health_check().await);
    if queue.is_ok() {
        if let Ok(depth) = state.queue.depth().await {
            metrics::gauge!("queue_depth").set(depth as f64);
            queue.queue_depth = Some(depth);
        }
    }

    let all_healthy = record_store.is_ok() && queue.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            record_store,
            queue,
        },
    };

    (status_code, Json(response))
}
