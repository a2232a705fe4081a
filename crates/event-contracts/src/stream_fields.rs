//! Conversion between an [`EventEnvelope`](crate::envelope::EventEnvelope)
//! and the flat string-keyed field map that a stream message actually
//! carries on the wire (per the serialization rule in the routing
//! contract: every field becomes one named field; nested maps/arrays are
//! JSON-encoded under their parent key; every value is a string).
use crate::envelope::{parse, serialize, EventEnvelope, ValidationError};
use serde_json::Value;
use std::collections::BTreeMap;

pub type StreamFields = BTreeMap<String, String>;

/// `to_stream_fields(event) -> map<string,string>`
pub fn to_stream_fields(event: &EventEnvelope) -> StreamFields {
    let bytes = serialize(event);
    let value: Value = serde_json::from_slice(&bytes).expect("envelope serializes to an object");

    let object = value.as_object().expect("envelope always serializes to a JSON object");

    object
        .iter()
        .map(|(k, v)| (k.clone(), scalarize(v)))
        .collect()
}

fn scalarize(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).expect("JSON value always serializes")
        }
        other => other.to_string(),
    }
}

/// `from_stream_fields(map, expected_kind) -> event | err`
///
/// Reverses [`to_stream_fields`]: values that look like JSON (`{...}` or
/// `[...]`) are parsed back into structured values; everything else is kept
/// as a JSON string. `expected_kind` is the `event` tag the caller is
/// prepared to handle; `Some(kind)` rejects a message whose actual kind
/// disagrees, `None` accepts any kind (used for topics that carry more than
/// one generic event type, which have no single canonical shape to check
/// against — only `order_status` does).
pub fn from_stream_fields(
    fields: &StreamFields,
    expected_kind: Option<&str>,
) -> Result<EventEnvelope, ValidationError> {
    let mut object = serde_json::Map::new();

    for (key, raw) in fields {
        let trimmed = raw.trim_start();
        let value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            serde_json::from_str(raw)
                .map_err(|e| ValidationError::Malformed(format!("field '{key}': {e}")))?
        } else if raw.is_empty() {
            Value::Null
        } else {
            Value::String(raw.clone())
        };
        object.insert(key.clone(), value);
    }

    let bytes =
        serde_json::to_vec(&Value::Object(object)).expect("JSON value always serializes");
    let event = parse(&bytes)?;

    if let Some(expected) = expected_kind {
        if event.event_kind() != expected {
            return Err(ValidationError::Malformed(format!(
                "expected event kind '{expected}', found '{}'",
                event.event_kind()
            )));
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EventBody, OrderStatus, Version};
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use uuid::Uuid;

    fn sample() -> EventEnvelope {
        EventEnvelope {
            body: EventBody::OrderStatus {
                order_id: Uuid::nil(),
                status: OrderStatus::Created,
            },
            version: Version { major: 1, minor: 0 },
            tenant_id: Uuid::nil(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            meta: None,
        }
    }

    #[test]
    fn every_field_becomes_a_string_valued_entry() {
        let fields = to_stream_fields(&sample());
        assert_eq!(fields["event"], "order_status");
        assert_eq!(fields["version"], "1.0");
        for v in fields.values() {
            // the map type itself enforces String values; this just
            // documents the invariant for readers of the test.
            let _: &String = v;
        }
    }

    #[test]
    fn nested_meta_is_json_encoded_under_its_key() {
        let mut event = sample();
        let mut meta = Map::new();
        meta.insert("reason".to_string(), Value::String("chargeback".into()));
        event.meta = Some(meta);

        let fields = to_stream_fields(&event);
        assert!(fields["meta"].starts_with('{'));
        assert!(fields["meta"].contains("chargeback"));
    }

    #[test]
    fn round_trips_through_stream_fields() {
        let event = sample();
        let fields = to_stream_fields(&event);
        let restored = from_stream_fields(&fields, Some("order_status")).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn round_trips_with_nested_meta() {
        let mut event = sample();
        let mut meta = Map::new();
        meta.insert("reason".to_string(), Value::String("chargeback".into()));
        event.meta = Some(meta);

        let fields = to_stream_fields(&event);
        let restored = from_stream_fields(&fields, Some("order_status")).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn round_trips_a_generic_non_order_event() {
        let mut payload = Map::new();
        payload.insert("field".to_string(), Value::String("display_name".into()));

        let event = EventEnvelope {
            body: EventBody::Generic {
                event_type: "profile_updated".to_string(),
                payload,
            },
            version: Version { major: 1, minor: 0 },
            tenant_id: Uuid::nil(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            meta: None,
        };

        let fields = to_stream_fields(&event);
        let restored = from_stream_fields(&fields, Some("profile_updated")).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn rejects_a_mismatched_expected_kind() {
        let event = sample();
        let fields = to_stream_fields(&event);
        assert!(from_stream_fields(&fields, Some("profile_updated")).is_err());
    }

    #[test]
    fn no_expected_kind_accepts_any_kind() {
        let event = sample();
        let fields = to_stream_fields(&event);
        assert!(from_stream_fields(&fields, None).is_ok());
    }

    #[test]
    fn malformed_json_field_is_rejected() {
        let mut fields = StreamFields::new();
        fields.insert("meta".to_string(), "{not json".to_string());
        assert!(from_stream_fields(&fields, Some("order_status")).is_err());
    }
}
