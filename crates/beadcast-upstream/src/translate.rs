//! Translation from the daemon's mutation records to [`MutationEvent`].
//!
//! The daemon's field naming has changed across releases (Go field names
//! without tags, then snake_case tags), so parsing accepts both spellings.

use beadcast_core::types::{DEFAULT_ENTITY_TYPE, MutationEvent, Operation};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::UpstreamError;

/// Raw mutation record as returned by `get_mutations`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMutation {
    /// Mutation kind: "create", "update", "delete", or anything newer.
    #[serde(rename = "type", alias = "Type", alias = "operation", default)]
    pub kind: String,
    #[serde(rename = "issue_id", alias = "IssueID", alias = "entity_id", alias = "id")]
    pub entity_id: String,
    #[serde(default, alias = "EntityType")]
    pub entity_type: Option<String>,
    #[serde(alias = "Timestamp")]
    pub timestamp: RawTimestamp,
}

/// Daemons emit RFC 3339 timestamps; test doubles and newer builds emit millis.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

impl RawTimestamp {
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Millis(ms) => *ms,
            Self::Rfc3339(at) => at.timestamp_millis(),
        }
    }
}

/// Translate a single raw record.
pub fn translate(raw: &RawMutation) -> MutationEvent {
    MutationEvent {
        entity_id: raw.entity_id.clone(),
        entity_type: raw
            .entity_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_owned()),
        operation: Operation::from_kind(&raw.kind),
        timestamp: raw.timestamp.as_millis(),
    }
}

/// Translate the `data` payload of a `get_mutations` response.
///
/// Accepts a bare array, `null` (an empty Go slice), or an object wrapping
/// the array under `events`. Any record that fails to parse rejects the
/// whole batch so the cursor is not advanced past it.
pub fn translate_batch(data: serde_json::Value) -> Result<Vec<MutationEvent>, UpstreamError> {
    let records = match data {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Object(mut obj) if obj.contains_key("events") => {
            obj.remove("events").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    };
    if records.is_null() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawMutation> = serde_json::from_value(records)?;
    Ok(raw.iter().map(translate).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snake_case_record_with_rfc3339_timestamp() {
        let data = serde_json::json!([{
            "type": "update",
            "issue_id": "bd-42",
            "title": "ignored",
            "timestamp": "2026-01-15T10:00:00.250Z",
        }]);
        let events = translate_batch(data).expect("translate");
        let expected_ts = Utc
            .with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
            .single()
            .expect("valid datetime")
            .timestamp_millis()
            + 250;
        assert_eq!(
            events,
            vec![MutationEvent::new("bd-42", "issue", Operation::Updated, expected_ts)]
        );
    }

    #[test]
    fn go_field_names_and_offset_timestamp() {
        let data = serde_json::json!([{
            "Type": "create",
            "IssueID": "bd-7",
            "Timestamp": "2026-01-15T02:00:00-08:00",
        }]);
        let events = translate_batch(data).expect("translate");
        let expected = Utc
            .with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
            .single()
            .expect("valid datetime");
        assert_eq!(events[0].operation, Operation::Created);
        assert_eq!(events[0].entity_id, "bd-7");
        assert_eq!(events[0].timestamp, expected.timestamp_millis());
    }

    #[test]
    fn millis_timestamp_and_explicit_entity_type() {
        let data = serde_json::json!({"events": [{
            "operation": "deleted",
            "entity_id": "ep-1",
            "entity_type": "epic",
            "timestamp": 1000,
        }]});
        let events = translate_batch(data).expect("translate");
        assert_eq!(
            events,
            vec![MutationEvent::new("ep-1", "epic", Operation::Deleted, 1000)]
        );
    }

    #[test]
    fn null_and_empty_payloads_are_empty_batches() {
        assert!(translate_batch(serde_json::Value::Null).expect("null").is_empty());
        assert!(translate_batch(serde_json::json!([])).expect("empty").is_empty());
        assert!(
            translate_batch(serde_json::json!({"events": null}))
                .expect("wrapped null")
                .is_empty()
        );
    }

    #[test]
    fn unknown_kind_is_kept_as_unknown() {
        let data = serde_json::json!([{"type": "comment", "issue_id": "bd-1", "timestamp": 5}]);
        let events = translate_batch(data).expect("translate");
        assert_eq!(events[0].operation, Operation::Unknown);
    }

    #[test]
    fn missing_id_rejects_whole_batch() {
        let data = serde_json::json!([
            {"type": "update", "issue_id": "bd-1", "timestamp": 5},
            {"type": "update", "timestamp": 6},
        ]);
        let err = translate_batch(data).expect_err("should reject");
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn non_array_payload_is_malformed() {
        let err = translate_batch(serde_json::json!("nope")).expect_err("should reject");
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }
}
