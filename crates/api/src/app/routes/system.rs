use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto::ReadinessResponse;
use crate::app::services::JobService;

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Task Queue Producer API is running",
    }))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// 200 with the queue depth when the store answers, 503 otherwise.
pub async fn ready(Extension(service): Extension<Arc<JobService>>) -> axum::response::Response {
    match service.readiness().await {
        Ok(r) => Json(ReadinessResponse {
            status: "ready",
            queue: r.queue,
            depth: r.depth,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}
