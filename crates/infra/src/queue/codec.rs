//! Wire format of queue entries: one JSON document per list element.

use taskq_core::JobRecord;

use super::QueueError;

pub fn encode(record: &JobRecord) -> Result<String, QueueError> {
    serde_json::to_string(record).map_err(|e| QueueError::Codec(e.to_string()))
}

pub fn decode(raw: &str) -> Result<JobRecord, QueueError> {
    serde_json::from_str(raw).map_err(|e| QueueError::Codec(format!("{e}: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskq_core::JobRequest;

    #[test]
    fn decodes_entries_written_by_other_producers() {
        let raw = r#"{"id":"01890a5d-ac96-774b-bcce-b302099a8057","payload":{"type":"email","data":{"to":"a@b.com"}},"createdAt":"2026-03-01T10:00:00.123Z"}"#;
        let record = decode(raw).unwrap();

        assert_eq!(record.job_type(), "email");
        assert_eq!(record.data(), Some(&json!({"to": "a@b.com"})));
        assert_eq!(record.id.to_string(), "01890a5d-ac96-774b-bcce-b302099a8057");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let record = JobRecord::admit(JobRequest::new("report", Some(json!([1, 2])))).unwrap();
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        for raw in ["", "not json", r#"{"id":"x"}"#, r#"{"payload":{"type":"a"}}"#] {
            assert!(matches!(decode(raw), Err(QueueError::Codec(_))), "{raw}");
        }
    }
}
