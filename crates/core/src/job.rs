//! Job request and record types.
//!
//! A [`JobRequest`] is what a producer asks for; a [`JobRecord`] is what the
//! queue stores once the request has been admitted. Records are immutable:
//! nothing in the system mutates a record after [`JobRecord::admit`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Message returned to callers that omit the job type.
pub const MISSING_TYPE_MESSAGE: &str = "Field \"type\" is required";

/// Caller-supplied job description: a type plus opaque data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type")]
    pub job_type: String,

    /// `None` when the field was absent; an explicit `null` is kept as
    /// `Some(Null)` so the payload round-trips unchanged.
    #[serde(
        default,
        deserialize_with = "present_data",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<JsonValue>,
}

/// Deserialize a field that is present, `null` included, as `Some`.
///
/// Pair with `#[serde(default)]` so an absent field stays `None`.
pub fn present_data<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<JsonValue>, D::Error> {
    JsonValue::deserialize(d).map(Some)
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, data: Option<JsonValue>) -> Self {
        Self {
            job_type: job_type.into(),
            data,
        }
    }

    /// A job type is required; any non-empty string is accepted as-is.
    pub fn validate(&self) -> DomainResult<()> {
        if self.job_type.is_empty() {
            return Err(DomainError::validation(MISSING_TYPE_MESSAGE));
        }
        Ok(())
    }
}

/// An admitted job, as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub payload: JobRequest,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Validate `request` and wrap it with a fresh id and admission time.
    pub fn admit(request: JobRequest) -> DomainResult<Self> {
        request.validate()?;
        Ok(Self {
            id: JobId::new(),
            payload: request,
            created_at: Utc::now().trunc_subsecs(3),
        })
    }

    pub fn job_type(&self) -> &str {
        &self.payload.job_type
    }

    pub fn data(&self) -> Option<&JsonValue> {
        self.payload.data.as_ref()
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix
/// (`2026-01-01T12:00:00.000Z`).
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
