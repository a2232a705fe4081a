//! Recognized configuration options, loaded from the environment with the
//! same "typed struct + `env::var` fallback" shape the rest of the fleet
//! uses rather than a generic untyped config map.
use resilience::BackoffConfig;
use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct OutboxTuning {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub max_retries: i32,
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone)]
pub struct SessionLimitsConfig {
    pub max_per_user: usize,
    pub max_per_tenant: usize,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub sse_main: Duration,
    pub sse_orders: Duration,
    pub sse_notifications: Duration,
    pub websocket: Duration,
}

#[derive(Debug, Clone)]
pub struct DlqTuning {
    pub alert_total: i64,
    pub alert_oldest_hours: i64,
    pub alert_failure_rate: f64,
    pub expire_days: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub outbox: OutboxTuning,
    pub session: SessionLimitsConfig,
    pub heartbeat: HeartbeatConfig,
    pub dlq: DlqTuning,
}

impl AppConfig {
    /// Reads recognized options from the environment; anything unset falls
    /// back to the documented default.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL environment variable not set".to_string())?;

        Ok(Self {
            service: ServiceConfig {
                http_port: env_or("HTTP_PORT", 8080),
                database_url,
                redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string()),
            },
            outbox: OutboxTuning {
                poll_interval_ms: env_or("POLL_INTERVAL_MS", 100),
                batch_size: env_or("BATCH_SIZE", 50),
                max_retries: env_or("MAX_RETRIES", 5),
                backoff: BackoffConfig {
                    base: Duration::from_millis(env_or("BACKOFF_BASE_MS", 100)),
                    cap: Duration::from_millis(env_or("BACKOFF_CAP_MS", 30_000)),
                    multiplier: env_or("BACKOFF_MULTIPLIER", 2.0),
                    jitter_frac: env_or("BACKOFF_JITTER_FRAC", 0.10),
                },
            },
            session: SessionLimitsConfig {
                max_per_user: env_or("SESSION_MAX_PER_USER", 10),
                max_per_tenant: env_or("SESSION_MAX_PER_TENANT", 1_000),
                max_frame_bytes: env_or("SESSION_MAX_FRAME_BYTES", 10_240),
            },
            heartbeat: HeartbeatConfig {
                sse_main: Duration::from_secs(env_or("HEARTBEAT_SSE_MAIN_S", 30)),
                sse_orders: Duration::from_secs(env_or("HEARTBEAT_SSE_ORDERS_S", 45)),
                sse_notifications: Duration::from_secs(env_or("HEARTBEAT_SSE_NOTIF_S", 60)),
                websocket: Duration::from_secs(env_or("HEARTBEAT_WS_S", 30)),
            },
            dlq: DlqTuning {
                alert_total: env_or("DLQ_ALERT_TOTAL", 1_000),
                alert_oldest_hours: env_or("DLQ_ALERT_OLDEST_HOURS", 24),
                alert_failure_rate: env_or("DLQ_ALERT_FAILURE_RATE", 0.5),
                expire_days: env_or("DLQ_EXPIRE_DAYS", 30),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn from_env_applies_documented_defaults_when_only_database_url_is_set() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/pulse_test");
        for key in [
            "HTTP_PORT",
            "REDIS_URL",
            "JWT_SECRET",
            "POLL_INTERVAL_MS",
            "BATCH_SIZE",
            "MAX_RETRIES",
            "SESSION_MAX_PER_USER",
            "SESSION_MAX_PER_TENANT",
            "SESSION_MAX_FRAME_BYTES",
            "DLQ_ALERT_TOTAL",
            "DLQ_ALERT_OLDEST_HOURS",
        ] {
            std::env::remove_var(key);
        }

        let config = AppConfig::from_env().expect("database url is set");

        assert_eq!(config.service.http_port, 8080);
        assert_eq!(config.outbox.poll_interval_ms, 100);
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.outbox.max_retries, 5);
        assert_eq!(config.session.max_per_user, 10);
        assert_eq!(config.session.max_per_tenant, 1_000);
        assert_eq!(config.session.max_frame_bytes, 10_240);
        assert_eq!(config.dlq.alert_total, 1_000);
        assert_eq!(config.dlq.alert_oldest_hours, 24);
        assert_eq!(config.heartbeat.sse_main, Duration::from_secs(30));
        assert_eq!(config.heartbeat.sse_orders, Duration::from_secs(45));
        assert_eq!(config.heartbeat.sse_notifications, Duration::from_secs(60));

        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial_test::serial]
    fn from_env_rejects_missing_database_url() {
        std::env::remove_var("DATABASE_URL");
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn from_env_honors_overrides() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/pulse_test");
        std::env::set_var("HTTP_PORT", "9100");
        std::env::set_var("MAX_RETRIES", "3");

        let config = AppConfig::from_env().expect("database url is set");

        assert_eq!(config.service.http_port, 9100);
        assert_eq!(config.outbox.max_retries, 3);

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("HTTP_PORT");
        std::env::remove_var("MAX_RETRIES");
    }
}
