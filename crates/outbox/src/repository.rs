use crate::error::OutboxResult;
use crate::model::{NewOutboxEvent, OutboxRow};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Row};

pub(crate) fn row_to_outbox(row: &sqlx::postgres::PgRow) -> Result<OutboxRow, sqlx::Error> {
    Ok(OutboxRow {
        id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
        retry_count: row.try_get("retry_count")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
    })
}

/// `UPDATE ... SET processed = TRUE, processed_at = now() WHERE id = $1`.
/// Pass the same transaction used to claim the row so this stays atomic
/// with the batch's other outcomes.
pub(crate) async fn mark_processed<'e, E>(executor: E, id: i64) -> OutboxResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE outbox_events SET processed = TRUE, processed_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Leaves `processed = false`, bumps `retry_count`, and reschedules
/// `next_attempt_at` per the backoff schedule.
pub(crate) async fn mark_retry<'e, E>(
    executor: E,
    id: i64,
    retry_count: i32,
    next_attempt_at: DateTime<Utc>,
) -> OutboxResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE outbox_events SET retry_count = $2, next_attempt_at = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(retry_count)
    .bind(next_attempt_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Non-transactional helpers used by writers (insert) and operational
/// dashboards (pending stats) — not part of the claim/mark hot path, which
/// runs entirely inside the consumer's own transaction.
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a business event into the outbox. Callers that need this
    /// co-transactional with their own business write should bind to the
    /// same `Transaction` rather than go through this pool-level helper.
    pub async fn insert(&self, event: &NewOutboxEvent) -> OutboxResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (aggregate_id, aggregate_type, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Pending count and oldest pending age in seconds (0 if none pending).
    pub async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)::BIGINT,
                COALESCE(EXTRACT(EPOCH FROM (now() - MIN(created_at)))::BIGINT, 0)
            FROM outbox_events
            WHERE processed = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
