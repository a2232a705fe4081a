use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
}

/// What a business-transaction writer inserts alongside its own row. The
/// writer owns picking `aggregate_id`/`aggregate_type`/`event_type`;
/// `payload` carries the event's own fields (tenant_id, version, ts, plus
/// whatever the event kind requires) but never the envelope's `event` tag
/// itself — the outbox stamps that from `event_type` at publish time.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
}
