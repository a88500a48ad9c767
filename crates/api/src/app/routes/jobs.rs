use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::dto::{SubmitJobRequest, SubmitJobResponse};
use crate::app::errors;
use crate::app::services::JobService;

/// `POST /job`: validate and enqueue one job.
pub async fn submit_job(
    Extension(service): Extension<Arc<JobService>>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(Json(body)) => body,
        // No JSON content type: treat as an empty body, so the missing
        // type is reported.
        Err(JsonRejection::MissingJsonContentType(_)) => SubmitJobRequest::default(),
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON body: {}", rejection.body_text()),
            );
        }
    };

    match service.submit(body).await {
        Ok(job) => (StatusCode::CREATED, Json(SubmitJobResponse::enqueued(job))).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}
