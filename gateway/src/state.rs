use crate::config::AppConfig;
use connection_registry::ConnectionRegistry;
use dlq::DlqRepository;
use outbox::StreamRepublisher;
use sqlx::PgPool;
use std::sync::Arc;
use stream_log::StreamLog;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: PgPool,
    pub stream_log: Arc<StreamLog>,
    pub registry: Arc<ConnectionRegistry>,
    pub dlq: Arc<DlqRepository>,
    pub republisher: Arc<StreamRepublisher>,
}
