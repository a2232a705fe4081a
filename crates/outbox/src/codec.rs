//! Turns a stored outbox/DLQ payload back into a validated [`EventEnvelope`].
//!
//! The stored `payload` carries every envelope field except the `event` tag
//! itself (that lives in the row's own `event_type` column); this stamps it
//! back in before handing the object to the schema validator.
use event_contracts::{parse, EventEnvelope, ValidationError};
use serde_json::Value;

pub fn build_envelope(event_type: &str, payload: &Value) -> Result<EventEnvelope, ValidationError> {
    let mut object = payload.as_object().cloned().unwrap_or_default();
    object.insert("event".to_string(), Value::String(event_type.to_string()));
    let bytes = serde_json::to_vec(&Value::Object(object))
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    parse(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamps_event_type_and_parses_a_valid_payload() {
        let payload = json!({
            "version": "1.0",
            "tenant_id": "00000000-0000-0000-0000-000000000000",
            "order_id": "00000000-0000-0000-0000-000000000000",
            "status": "created",
            "ts": "2025-01-01T00:00:00Z",
        });

        let event = build_envelope("order_status", &payload).unwrap();
        assert_eq!(event.event_kind(), "order_status");
    }

    #[test]
    fn stamps_event_type_and_preserves_a_generic_payload() {
        let payload = json!({
            "version": "1.0",
            "tenant_id": "00000000-0000-0000-0000-000000000000",
            "user_id": "00000000-0000-0000-0000-000000000000",
            "field": "display_name",
            "ts": "2025-01-01T00:00:00Z",
        });

        let event = build_envelope("profile_updated", &payload).unwrap();
        assert_eq!(event.event_kind(), "profile_updated");
    }

    #[test]
    fn rejects_malformed_version() {
        let payload = json!({
            "version": "abc",
            "tenant_id": "00000000-0000-0000-0000-000000000000",
            "order_id": "00000000-0000-0000-0000-000000000000",
            "status": "created",
            "ts": "2025-01-01T00:00:00Z",
        });

        assert!(build_envelope("order_status", &payload).is_err());
    }

    #[test]
    fn rejects_a_non_object_payload() {
        assert!(build_envelope("order_status", &Value::Null).is_err());
    }
}
