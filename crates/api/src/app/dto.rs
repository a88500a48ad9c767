use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use taskq_core::{JobRecord, JobRequest, MISSING_TYPE_MESSAGE};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /job`.
///
/// Both fields are optional at the JSON level so that a missing `type`
/// produces the domain validation message rather than a parse error.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type", default)]
    pub job_type: Option<JsonValue>,
    #[serde(default, deserialize_with = "taskq_core::present_data")]
    pub data: Option<JsonValue>,
}

impl SubmitJobRequest {
    /// Convert into a domain request. `type` must be a string; anything
    /// else (absent, null, number, object) is rejected.
    pub fn into_request(self) -> Result<JobRequest, String> {
        match self.job_type {
            Some(JsonValue::String(job_type)) => Ok(JobRequest::new(job_type, self.data)),
            Some(JsonValue::Null) | None => Err(MISSING_TYPE_MESSAGE.to_string()),
            Some(_) => Err("Field \"type\" must be a string".to_string()),
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

pub const JOB_ENQUEUED_MESSAGE: &str = "Job enqueued successfully";

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub message: &'static str,
    pub job: JobRecord,
}

impl SubmitJobResponse {
    pub fn enqueued(job: JobRecord) -> Self {
        Self {
            message: JOB_ENQUEUED_MESSAGE,
            job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub queue: String,
    pub depth: usize,
}
