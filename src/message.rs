// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Correlation Envelope
//!
//! Request/response payloads travel as JSON objects carrying a `correlationId` and a
//! `correlationTimestamp`. The receiving side decodes that shape explicitly to decide
//! whether a message takes part in deduplication.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const CORRELATION_ID_FIELD: &str = "correlationId";
pub const CORRELATION_TIMESTAMP_FIELD: &str = "correlationTimestamp";
/// Field wrapping a payload that is not a JSON object
pub const WRAPPED_DATA_FIELD: &str = "data";

/// Unique identifier and creation time attached to a request at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEnvelope {
    pub correlation_id: String,
    /// Milliseconds since the Unix epoch.
    pub correlation_timestamp: i64,
}

impl CorrelationEnvelope {
    pub fn generate() -> Self {
        CorrelationEnvelope {
            correlation_id: Uuid::new_v4().to_string(),
            correlation_timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Merges the envelope into `payload`.
    ///
    /// Objects receive the two fields alongside their own; any other value is wrapped
    /// as `{"data": payload}` first.
    pub fn seal(&self, payload: Value) -> Value {
        let mut object = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(WRAPPED_DATA_FIELD.to_owned(), other);
                map
            }
        };

        object.insert(
            CORRELATION_ID_FIELD.to_owned(),
            Value::String(self.correlation_id.clone()),
        );
        object.insert(
            CORRELATION_TIMESTAMP_FIELD.to_owned(),
            Value::from(self.correlation_timestamp),
        );

        Value::Object(object)
    }
}

/// Result of inspecting an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<'a> {
    /// The payload carries a string correlation identifier.
    HasCorrelation {
        id: &'a str,
        /// Text of `correlationTimestamp`: strings as is, other values as JSON text.
        /// `None` when missing or null.
        timestamp: Option<String>,
        rest: &'a Value,
    },
    /// Anything else: idempotency does not apply.
    Bare(&'a Value),
}

pub fn decode(payload: &Value) -> Decoded<'_> {
    let Some(object) = payload.as_object() else {
        return Decoded::Bare(payload);
    };

    match object.get(CORRELATION_ID_FIELD).and_then(Value::as_str) {
        Some(id) => Decoded::HasCorrelation {
            id,
            timestamp: object.get(CORRELATION_TIMESTAMP_FIELD).and_then(timestamp_text),
            rest: payload,
        },
        None => Decoded::Bare(payload),
    }
}

fn timestamp_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Result returned in place of the handler output for a duplicate delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReceipt {
    pub duplicate: bool,
    pub correlation_id: String,
}

impl DuplicateReceipt {
    pub fn new(correlation_id: &str) -> Self {
        DuplicateReceipt {
            duplicate: true,
            correlation_id: correlation_id.to_owned(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "duplicate": self.duplicate,
            "correlationId": self.correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_correlated_payload() {
        let payload = json!({"correlationId": "abc", "correlationTimestamp": 1000, "a": 1});

        assert_eq!(
            decode(&payload),
            Decoded::HasCorrelation {
                id: "abc",
                timestamp: Some("1000".to_owned()),
                rest: &payload
            }
        );
    }

    #[test]
    fn non_string_correlation_id_is_bare() {
        let payload = json!({"correlationId": 42});
        assert_eq!(decode(&payload), Decoded::Bare(&payload));

        let payload = json!(["correlationId"]);
        assert_eq!(decode(&payload), Decoded::Bare(&payload));

        let payload = Value::Null;
        assert_eq!(decode(&payload), Decoded::Bare(&payload));
    }

    #[test]
    fn missing_timestamp_still_correlates() {
        let payload = json!({"correlationId": "abc"});

        assert!(matches!(
            decode(&payload),
            Decoded::HasCorrelation {
                id: "abc",
                timestamp: None,
                ..
            }
        ));
    }

    #[test]
    fn timestamp_keeps_its_wire_text() {
        let timestamp = |payload: Value| match decode(&payload) {
            Decoded::HasCorrelation { timestamp, .. } => timestamp,
            Decoded::Bare(_) => panic!("expected a correlated payload"),
        };

        assert_eq!(
            timestamp(json!({"correlationId": "a", "correlationTimestamp": 1000.5})),
            Some("1000.5".to_owned())
        );
        assert_eq!(
            timestamp(json!({"correlationId": "a", "correlationTimestamp": "1000"})),
            Some("1000".to_owned())
        );
        assert_eq!(
            timestamp(json!({"correlationId": "a", "correlationTimestamp": null})),
            None
        );
    }

    #[test]
    fn seal_merges_into_objects() {
        let envelope = CorrelationEnvelope {
            correlation_id: "abc".to_owned(),
            correlation_timestamp: 1000,
        };

        assert_eq!(
            envelope.seal(json!({"symbol": "ETH"})),
            json!({"symbol": "ETH", "correlationId": "abc", "correlationTimestamp": 1000})
        );
    }

    #[test]
    fn seal_wraps_scalars() {
        let envelope = CorrelationEnvelope {
            correlation_id: "abc".to_owned(),
            correlation_timestamp: 1000,
        };

        assert_eq!(
            envelope.seal(json!(7)),
            json!({"data": 7, "correlationId": "abc", "correlationTimestamp": 1000})
        );
    }

    #[test]
    fn generated_envelopes_are_unique() {
        let a = CorrelationEnvelope::generate();
        let b = CorrelationEnvelope::generate();

        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.correlation_timestamp > 0);
    }

    #[test]
    fn duplicate_receipt_shape() {
        assert_eq!(
            DuplicateReceipt::new("abc").to_value(),
            json!({"duplicate": true, "correlationId": "abc"})
        );
    }
}
