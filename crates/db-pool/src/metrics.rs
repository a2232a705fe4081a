//! Prometheus metrics for the database connection pool
//!
//! Tracks pool size, connection acquisition latency, and errors.

use prometheus::{register_histogram_vec, register_int_gauge_vec, HistogramVec, IntGaugeVec};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::time::Instant;

lazy_static::lazy_static! {
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("prometheus metrics registration should succeed at startup");

    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("prometheus metrics registration should succeed at startup");

    static ref DB_POOL_CONNECTION_ERRORS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connection_errors_total",
        "Connection acquisition errors",
        &["service", "error_type"]
    ).expect("prometheus metrics registration should succeed at startup");
}

pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;
    let active = size - idle;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(active);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(pool.options().get_max_connections() as i64);
}

/// Acquire a connection from the pool and record metrics.
///
/// Drop-in replacement for `pool.acquire().await` that tracks acquisition
/// latency and error rates.
pub async fn acquire_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<PoolConnection<Postgres>, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;

    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        let error_type = match e {
            sqlx::Error::PoolTimedOut => "timeout",
            sqlx::Error::PoolClosed => "closed",
            _ => "other",
        };

        DB_POOL_CONNECTION_ERRORS
            .with_label_values(&[service, error_type])
            .inc();
    }

    result
}

/// Pool utilization threshold past which new acquisitions are rejected
/// rather than queued, so a saturated database degrades into explicit
/// backpressure instead of an unbounded wait queue.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

impl BackpressureConfig {
    pub fn from_env() -> Self {
        let threshold = std::env::var("DB_POOL_BACKPRESSURE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(0.85);

        Self { threshold }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pool for {service} is saturated: utilization {:.2}% >= threshold {:.2}%", utilization * 100.0, threshold * 100.0)]
pub struct PoolExhaustedError {
    pub service: String,
    pub utilization: f64,
    pub threshold: f64,
}

/// Acquire a connection, but reject up front (instead of queuing) once pool
/// utilization crosses the configured threshold.
pub async fn acquire_with_backpressure(
    pool: &PgPool,
    service: &str,
    config: &BackpressureConfig,
) -> Result<PoolConnection<Postgres>, PoolExhaustedError> {
    let size = pool.size().max(1) as f64;
    let idle = pool.num_idle() as f64;
    let utilization = (size - idle) / size;

    if utilization >= config.threshold {
        return Err(PoolExhaustedError {
            service: service.to_string(),
            utilization,
            threshold: config.threshold,
        });
    }

    acquire_with_metrics(pool, service)
        .await
        .map_err(|_| PoolExhaustedError {
            service: service.to_string(),
            utilization,
            threshold: config.threshold,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_config_default_threshold() {
        assert_eq!(BackpressureConfig::default().threshold, 0.85);
    }

    #[test]
    fn pool_exhausted_error_message_contains_percentages() {
        let error = PoolExhaustedError {
            service: "gateway".to_string(),
            utilization: 0.92,
            threshold: 0.85,
        };
        let msg = error.to_string();
        assert!(msg.contains("gateway"));
        assert!(msg.contains("92.00%"));
        assert!(msg.contains("85.00%"));
    }
}
