use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Parked,
    Reprocessing,
    Resolved,
    Expired,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Parked => "parked",
            DlqStatus::Reprocessing => "reprocessing",
            DlqStatus::Resolved => "resolved",
            DlqStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DlqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parked" => Ok(DlqStatus::Parked),
            "reprocessing" => Ok(DlqStatus::Reprocessing),
            "resolved" => Ok(DlqStatus::Resolved),
            "expired" => Ok(DlqStatus::Expired),
            other => Err(format!("unrecognized dlq status '{other}'")),
        }
    }
}

/// Why an event was parked. `park()` only ever stamps one of these two;
/// `reprocess()` overwrites it with the latest republish failure.
pub const REASON_SCHEMA_VIOLATION: &str = "schema_violation";
pub const REASON_MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub failed_at: DateTime<Utc>,
    pub retry_count: i32,
    pub failure_reason: String,
    pub status: DlqStatus,
    pub reprocess_attempts: i32,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub aggregate_type: Option<String>,
    pub status: Option<DlqStatus>,
    pub older_than: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total: i64,
    pub by_aggregate_type: std::collections::BTreeMap<String, i64>,
    pub by_status: std::collections::BTreeMap<String, i64>,
    /// Fraction, in `[0, 1]`, of events parked in the trailing 24h that
    /// remain unresolved (neither `resolved` nor `expired`).
    pub failure_rate: f64,
    pub oldest_age_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertThresholds {
    pub alert_total: i64,
    pub alert_oldest_hours: i64,
    pub alert_failure_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            alert_total: 1_000,
            alert_oldest_hours: 24,
            alert_failure_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchReprocessResult {
    pub attempted: i64,
    pub succeeded: i64,
    pub failed: i64,
}

/// Everything the outbox consumer knows about a row it is parking.
#[derive(Debug, Clone)]
pub struct ParkRequest {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub retry_count: i32,
    pub failure_reason: String,
}
