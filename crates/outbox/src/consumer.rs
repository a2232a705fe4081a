//! Background processor that drains the outbox: claim a batch under
//! `FOR UPDATE SKIP LOCKED`, validate and publish each row, and commit every
//! row's outcome (published / retry-later / parked) atomically with the
//! claim.
use crate::codec::build_envelope;
use crate::error::OutboxResult;
use crate::model::OutboxRow;
use crate::repository::{mark_processed, mark_retry, row_to_outbox};
use chrono::Utc;
use dlq::{ParkRequest, REASON_MAX_RETRIES_EXCEEDED, REASON_SCHEMA_VIOLATION};
use event_contracts::{default_topic_config, to_stream_fields, topic_for};
use resilience::{compute_backoff, BackoffConfig};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use stream_log::StreamLog;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_retries: i32,
    pub backoff: BackoffConfig,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 50,
            max_retries: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

pub struct OutboxConsumer {
    pool: PgPool,
    stream_log: Arc<StreamLog>,
    config: OutboxConfig,
}

impl OutboxConsumer {
    pub fn new(pool: PgPool, stream_log: Arc<StreamLog>, config: OutboxConfig) -> Self {
        Self {
            pool,
            stream_log,
            config,
        }
    }

    /// Long-running loop; terminates only when `shutdown` reports `true`.
    /// Each tick claims and fully commits one batch before checking for
    /// shutdown again, so a signal mid-batch still lets that batch land.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "outbox consumer starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if *shutdown.borrow() {
                break;
            }

            match self.process_tick().await {
                Ok(published) if published > 0 => {
                    info!(published_count = published, "published events from outbox");
                }
                Ok(_) => debug!("no outbox rows due"),
                Err(e) => error!(error = %e, "outbox tick failed"),
            }
        }

        info!("outbox consumer shut down");
    }

    /// One tick: claim a batch, resolve each row, commit.
    async fn process_tick(&self) -> OutboxResult<i64> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_events
            WHERE processed = FALSE AND next_attempt_at <= now()
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let mut published = 0i64;
        for row in &rows {
            let outbox_row = row_to_outbox(row)?;
            if self.handle_row(&mut tx, &outbox_row).await? {
                published += 1;
            }
        }

        tx.commit().await?;
        Ok(published)
    }

    /// Validate -> publish -> mark, per row. Returns `true` if the row was
    /// published this tick.
    async fn handle_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row: &OutboxRow,
    ) -> OutboxResult<bool> {
        let event = match build_envelope(&row.event_type, &row.payload) {
            Ok(event) => event,
            Err(validation_err) => {
                self.park_row(tx, row, REASON_SCHEMA_VIOLATION, &validation_err.to_string())
                    .await?;
                mark_processed(&mut **tx, row.id).await?;
                return Ok(false);
            }
        };

        let topic = topic_for(&row.aggregate_type, &row.event_type);
        let topic_config = default_topic_config(topic);
        let fields = to_stream_fields(&event);

        match self.stream_log.publish(topic, &topic_config, &fields).await {
            Ok(message_id) => {
                debug!(event_id = row.id, topic = topic.name(), message_id = %message_id, "published outbox row");
                mark_processed(&mut **tx, row.id).await?;
                Ok(true)
            }
            Err(publish_err) => {
                let retry_count = row.retry_count + 1;
                if retry_count >= self.config.max_retries {
                    self.park_row(tx, row, REASON_MAX_RETRIES_EXCEEDED, &publish_err.to_string())
                        .await?;
                    mark_processed(&mut **tx, row.id).await?;
                } else {
                    let delay = compute_backoff(&self.config.backoff, retry_count as u32);
                    let next_attempt_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    warn!(
                        event_id = row.id,
                        retry_count,
                        delay_ms = delay.as_millis(),
                        error = %publish_err,
                        "outbox publish failed, scheduling retry"
                    );
                    mark_retry(&mut **tx, row.id, retry_count, next_attempt_at).await?;
                }
                Ok(false)
            }
        }
    }

    async fn park_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row: &OutboxRow,
        reason: &str,
        detail: &str,
    ) -> OutboxResult<()> {
        let request = ParkRequest {
            event_id: Uuid::new_v4(),
            aggregate_id: row.aggregate_id.clone(),
            aggregate_type: row.aggregate_type.clone(),
            event_type: row.event_type.clone(),
            payload: row.payload.clone(),
            retry_count: row.retry_count,
            failure_reason: format!("{reason}: {detail}"),
        };
        dlq::park(&mut **tx, &request).await.map_err(|e| match e {
            dlq::DlqError::Database(sqlx_err) => sqlx_err.into(),
            other => sqlx::Error::Protocol(other.to_string()).into(),
        })
    }
}
