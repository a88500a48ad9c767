use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::app::services::SubmitError;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        SubmitError::Store(e) => {
            tracing::error!(error = %e, "failed to enqueue job");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// `{"error": message}` with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": message.into(),
        })),
    )
        .into_response()
}
