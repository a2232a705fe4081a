//! Dead letter queue: the second-order store for outbox rows that exceeded
//! their retry budget or failed schema validation outright. Status
//! transitions are compare-and-set at the SQL layer so concurrent operators
//! (or a batch reprocess racing a manual resolve) can't corrupt a record.

pub mod error;
pub mod model;

pub use error::{DlqError, DlqResult};
pub use model::*;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgExecutor, PgPool, QueryBuilder, Row};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Republishes a parked event through the stream router. Implemented by the
/// outbox crate (or the gateway binary) so this crate never needs to depend
/// on `event-contracts`/`stream-log` directly.
#[async_trait]
pub trait Republisher: Send + Sync {
    async fn republish(&self, record: &DlqRecord) -> Result<(), String>;
}

/// Insert a parked row. Pass the same `&mut Transaction` the caller used to
/// mark the outbox row `processed` so both writes commit atomically (the
/// no-duplicate-mark invariant requires this).
pub async fn park<'e, E>(executor: E, req: &ParkRequest) -> DlqResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO dlq_events (
            event_id, aggregate_id, aggregate_type, event_type,
            payload, retry_count, failure_reason, status
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'parked')
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(req.event_id)
    .bind(&req.aggregate_id)
    .bind(&req.aggregate_type)
    .bind(&req.event_type)
    .bind(&req.payload)
    .bind(req.retry_count)
    .bind(&req.failure_reason)
    .execute(executor)
    .await?;

    warn!(
        event_id = %req.event_id,
        reason = %req.failure_reason,
        retry_count = req.retry_count,
        "event parked in dead letter queue"
    );

    Ok(())
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<DlqRecord, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(DlqRecord {
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        failed_at: row.try_get("failed_at")?,
        retry_count: row.try_get("retry_count")?,
        failure_reason: row.try_get("failure_reason")?,
        status: status_str.parse().map_err(|e: String| {
            sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: e.into(),
            }
        })?,
        reprocess_attempts: row.try_get("reprocess_attempts")?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

pub struct DlqRepository {
    pool: PgPool,
}

impl DlqRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `list(filters) -> page`, newest-parked first.
    pub async fn list(&self, filters: &ListFilters) -> DlqResult<Vec<DlqRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM dlq_events WHERE 1=1");

        if let Some(agg) = &filters.aggregate_type {
            qb.push(" AND aggregate_type = ").push_bind(agg);
        }
        if let Some(status) = filters.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(older_than) = filters.older_than {
            qb.push(" AND failed_at < ").push_bind(older_than);
        }

        qb.push(" ORDER BY failed_at DESC LIMIT ")
            .push_bind(filters.limit.max(1))
            .push(" OFFSET ")
            .push_bind(filters.offset.max(0));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect::<Result<_, _>>().map_err(DlqError::from)
    }

    /// `stats() -> {total, by_aggregate_type, by_status, failure_rate, oldest_age}`.
    pub async fn stats(&self) -> DlqResult<DlqStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dlq_events")
            .fetch_one(&self.pool)
            .await?;

        let by_aggregate_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT aggregate_type, COUNT(*) FROM dlq_events GROUP BY aggregate_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_aggregate_type: BTreeMap<String, i64> = by_aggregate_rows.into_iter().collect();

        let by_status_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM dlq_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let by_status: BTreeMap<String, i64> = by_status_rows.into_iter().collect();

        let oldest_age_seconds: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(EXTRACT(EPOCH FROM (now() - MIN(failed_at)))::BIGINT, 0)
            FROM dlq_events
            WHERE status = 'parked'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let window_row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status NOT IN ('resolved', 'expired'))::BIGINT,
                COUNT(*)::BIGINT
            FROM dlq_events
            WHERE failed_at >= now() - interval '24 hours'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let (unresolved_in_window, total_in_window) = window_row;
        let failure_rate = if total_in_window > 0 {
            unresolved_in_window as f64 / total_in_window as f64
        } else {
            0.0
        };

        Ok(DlqStats {
            total,
            by_aggregate_type,
            by_status,
            failure_rate,
            oldest_age_seconds,
        })
    }

    /// `alerts() -> [alert]` against the configured thresholds.
    pub async fn alerts(&self, thresholds: &AlertThresholds) -> DlqResult<Vec<Alert>> {
        let stats = self.stats().await?;
        let mut alerts = Vec::new();

        if stats.total > thresholds.alert_total {
            alerts.push(Alert {
                kind: "total_exceeded",
                message: format!(
                    "dlq total {} exceeds threshold {}",
                    stats.total, thresholds.alert_total
                ),
            });
        }

        let oldest_hours = stats.oldest_age_seconds / 3600;
        if oldest_hours > thresholds.alert_oldest_hours {
            alerts.push(Alert {
                kind: "oldest_age_exceeded",
                message: format!(
                    "oldest parked event is {oldest_hours}h old, exceeds threshold {}h",
                    thresholds.alert_oldest_hours
                ),
            });
        }

        if stats.failure_rate > thresholds.alert_failure_rate {
            alerts.push(Alert {
                kind: "failure_rate_exceeded",
                message: format!(
                    "failure rate {:.2} exceeds threshold {:.2}",
                    stats.failure_rate, thresholds.alert_failure_rate
                ),
            });
        }

        Ok(alerts)
    }

    /// Rows awaiting a human: parked, with more reprocess attempts than
    /// `min_attempts` already spent.
    pub async fn manual_intervention_queue(&self, min_attempts: i32) -> DlqResult<Vec<DlqRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM dlq_events
            WHERE status = 'parked' AND reprocess_attempts >= $1
            ORDER BY failed_at ASC
            "#,
        )
        .bind(min_attempts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect::<Result<_, _>>().map_err(DlqError::from)
    }

    /// `reprocess(event_id)`: `parked -> reprocessing`, republish, then
    /// `-> resolved` on success or back to `parked` (reason updated, attempt
    /// counter bumped) on failure.
    pub async fn reprocess(
        &self,
        event_id: Uuid,
        republisher: &dyn Republisher,
    ) -> DlqResult<()> {
        let row = sqlx::query(
            r#"
            UPDATE dlq_events
            SET status = 'reprocessing'
            WHERE event_id = $1 AND status = 'parked'
            RETURNING *
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                let current = self.current_status(event_id).await?;
                return Err(DlqError::NotParked(event_id, current));
            }
        };
        let record = row_to_record(&row)?;

        match republisher.republish(&record).await {
            Ok(()) => {
                sqlx::query(
                    r#"
                    UPDATE dlq_events
                    SET status = 'resolved', resolved_at = now()
                    WHERE event_id = $1 AND status = 'reprocessing'
                    "#,
                )
                .bind(event_id)
                .execute(&self.pool)
                .await?;
                info!(event_id = %event_id, "dlq event reprocessed successfully");
                Ok(())
            }
            Err(reason) => {
                sqlx::query(
                    r#"
                    UPDATE dlq_events
                    SET status = 'parked',
                        failure_reason = $2,
                        reprocess_attempts = reprocess_attempts + 1
                    WHERE event_id = $1 AND status = 'reprocessing'
                    "#,
                )
                .bind(event_id)
                .bind(&reason)
                .execute(&self.pool)
                .await?;
                warn!(event_id = %event_id, reason = %reason, "dlq reprocess attempt failed");
                Err(DlqError::RepublishFailed(reason))
            }
        }
    }

    /// `batch_reprocess(aggregate_type, limit) -> {attempted, succeeded, failed}`.
    pub async fn batch_reprocess(
        &self,
        aggregate_type: Option<&str>,
        limit: i64,
        republisher: &dyn Republisher,
    ) -> DlqResult<BatchReprocessResult> {
        let limit = limit.clamp(1, 50);
        let mut qb = QueryBuilder::new("SELECT event_id FROM dlq_events WHERE status = 'parked'");
        if let Some(agg) = aggregate_type {
            qb.push(" AND aggregate_type = ").push_bind(agg);
        }
        qb.push(" ORDER BY failed_at ASC LIMIT ").push_bind(limit);

        let ids: Vec<Uuid> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await?;

        let mut result = BatchReprocessResult {
            attempted: ids.len() as i64,
            ..Default::default()
        };

        for id in ids {
            match self.reprocess(id, republisher).await {
                Ok(()) => result.succeeded += 1,
                Err(_) => result.failed += 1,
            }
        }

        Ok(result)
    }

    /// `manual_resolve(event_id, operator_id)`: `{parked, reprocessing} -> resolved`
    /// without republishing.
    pub async fn manual_resolve(&self, event_id: Uuid, operator_id: &str) -> DlqResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dlq_events
            SET status = 'resolved', resolved_by = $2, resolved_at = now()
            WHERE event_id = $1 AND status IN ('parked', 'reprocessing')
            "#,
        )
        .bind(event_id)
        .bind(operator_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.current_status(event_id).await?;
            return Err(DlqError::NotParked(event_id, current));
        }

        info!(event_id = %event_id, operator_id = %operator_id, "dlq event manually resolved");
        Ok(())
    }

    /// `expire(older_than_days)`: `{resolved, parked} -> expired` for rows
    /// older than the threshold (measured from resolution, or from parking
    /// if never resolved).
    pub async fn expire(&self, older_than_days: i64) -> DlqResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);

        let result = sqlx::query(
            r#"
            UPDATE dlq_events
            SET status = 'expired'
            WHERE status IN ('resolved', 'parked')
              AND COALESCE(resolved_at, failed_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        info!(count = result.rows_affected(), days = older_than_days, "expired stale dlq events");
        Ok(result.rows_affected())
    }

    async fn current_status(&self, event_id: Uuid) -> DlqResult<String> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM dlq_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        status.ok_or(DlqError::NotFound(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            DlqStatus::Parked,
            DlqStatus::Reprocessing,
            DlqStatus::Resolved,
            DlqStatus::Expired,
        ] {
            let parsed: DlqStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn unrecognized_status_is_rejected() {
        assert!("bogus".parse::<DlqStatus>().is_err());
    }
}
