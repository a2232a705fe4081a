//! The versioned event envelope (external wire contract) plus the richer
//! internal form that travels on the stream log.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// `"<major>.<minor>"`. The major number is the compatibility boundary:
/// consumers reject events whose major exceeds the one they were compiled
/// for, but accept any minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn is_compatible_with(&self, compiled_for_major: u32) -> bool {
        self.major <= compiled_for_major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| ValidationError::InvalidVersion(s.to_string()))?;

        let major = major
            .parse()
            .map_err(|_| ValidationError::InvalidVersion(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| ValidationError::InvalidVersion(s.to_string()))?;

        Ok(Self { major, minor })
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Confirmed,
    Failed,
}

/// The semantic class of event plus whatever fields are specific to it.
///
/// `OrderStatus` is the canonical, fully validated contract (`order_id` +
/// `status`). Other aggregate types (`profile_updated`, anything routed to
/// `users`/`products`/`notifications`/`payments`/`inventory`) route through
/// the stream without a dedicated typed shape; `Generic` retains the real
/// `event` tag plus every other field verbatim as a structured payload map,
/// so the envelope round-trips regardless of which topic it belongs to.
///
/// Hand-rolled `Serialize`/`Deserialize` rather than a derive: the `event`
/// tag doubles as `Generic`'s own data (its literal value), which
/// `#[serde(other)]` cannot capture — that attribute only allows a unit
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    OrderStatus { order_id: Uuid, status: OrderStatus },
    Generic { event_type: String, payload: Map<String, Value> },
}

impl Serialize for EventBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            EventBody::OrderStatus { order_id, status } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("event", "order_status")?;
                map.serialize_entry("order_id", order_id)?;
                map.serialize_entry("status", status)?;
                map.end()
            }
            EventBody::Generic { event_type, payload } => {
                let mut map = serializer.serialize_map(Some(payload.len() + 1))?;
                map.serialize_entry("event", event_type)?;
                for (key, value) in payload {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for EventBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut value = Value::deserialize(deserializer)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| serde::de::Error::custom("event body must be a JSON object"))?;

        let event_type = object
            .remove("event")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| serde::de::Error::custom("missing 'event' field"))?;

        if event_type == "order_status" {
            let order_id = object
                .remove("order_id")
                .ok_or_else(|| serde::de::Error::custom("missing 'order_id' field"))?;
            let status = object
                .remove("status")
                .ok_or_else(|| serde::de::Error::custom("missing 'status' field"))?;
            let order_id: Uuid = serde_json::from_value(order_id).map_err(serde::de::Error::custom)?;
            let status: OrderStatus = serde_json::from_value(status).map_err(serde::de::Error::custom)?;
            Ok(EventBody::OrderStatus { order_id, status })
        } else {
            Ok(EventBody::Generic {
                event_type,
                payload: std::mem::take(object),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub body: EventBody,
    pub version: Version,
    pub tenant_id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl EventEnvelope {
    pub fn aggregate_id(&self) -> Option<Uuid> {
        match &self.body {
            EventBody::OrderStatus { order_id, .. } => Some(*order_id),
            EventBody::Generic { .. } => None,
        }
    }

    pub fn event_kind(&self) -> &str {
        match &self.body {
            EventBody::OrderStatus { .. } => "order_status",
            EventBody::Generic { event_type, .. } => event_type,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("version '{0}' does not match ^[0-9]+\\.[0-9]+$")]
    InvalidVersion(String),
    #[error("incompatible major version {found} (compiled for {compiled_for})")]
    IncompatibleMajor { found: u32, compiled_for: u32 },
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// `parse(bytes) -> event | err`
pub fn parse(bytes: &[u8]) -> Result<EventEnvelope, ValidationError> {
    serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))
}

/// `serialize(event) -> bytes`, canonical form (ISO-8601 UTC timestamp,
/// lowercase UUIDs, enum values as their string tokens).
pub fn serialize(event: &EventEnvelope) -> Vec<u8> {
    serde_json::to_vec(event).expect("EventEnvelope always serializes")
}

/// Reject events whose major version exceeds what this binary was compiled
/// against; accept any minor.
pub fn check_major_compatible(
    version: Version,
    compiled_for_major: u32,
) -> Result<(), ValidationError> {
    if version.is_compatible_with(compiled_for_major) {
        Ok(())
    } else {
        Err(ValidationError::IncompatibleMajor {
            found: version.major,
            compiled_for: compiled_for_major,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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
    fn round_trips_through_parse_and_serialize() {
        let event = sample();
        let bytes = serialize(&event);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn canonical_wire_shape_matches_contract() {
        let bytes = serialize(&sample());
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "order_status");
        assert_eq!(value["version"], "1.0");
        assert!(value.get("order_id").is_some());
        assert!(value.get("status").is_some());
        assert!(value.get("meta").is_none());
    }

    #[test]
    fn version_parses_major_minor() {
        let v: Version = "2.3".parse().unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.minor, 3);
    }

    #[test]
    fn version_rejects_non_numeric_parts() {
        assert!("abc".parse::<Version>().is_err());
        assert!("1".parse::<Version>().is_err());
    }

    #[test]
    fn major_version_is_the_compatibility_boundary() {
        assert!(check_major_compatible(Version { major: 1, minor: 9 }, 1).is_ok());
        assert!(check_major_compatible(Version { major: 2, minor: 0 }, 1).is_err());
    }

    #[test]
    fn round_trips_a_generic_non_order_event() {
        let mut payload = Map::new();
        payload.insert("user_id".to_string(), Value::String(Uuid::nil().to_string()));
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

        let bytes = serialize(&event);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.event_kind(), "profile_updated");
        assert_eq!(parsed.aggregate_id(), None);

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "profile_updated");
        assert_eq!(value["field"], "display_name");
    }

    #[test]
    fn meta_round_trips_when_present() {
        let mut event = sample();
        let mut meta = Map::new();
        meta.insert("reason".to_string(), Value::String("manual override".into()));
        event.meta = Some(meta);

        let bytes = serialize(&event);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.meta.unwrap()["reason"], "manual override");
    }
}
