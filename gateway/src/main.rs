mod auth;
mod config;
mod dlq_routes;
mod fanout;
mod sse;
mod state;
mod ws;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use connection_registry::{ConnectionRegistry, SessionLimits};
use db_pool::{create_pool, DbConfig};
use dlq::DlqRepository;
use outbox::{OutboxConfig, OutboxConsumer, StreamRepublisher};
use redis_utils::RedisPool;
use state::AppState;
use std::io;
use std::sync::Arc;
use stream_log::StreamLog;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting gateway");

    let config = AppConfig::from_env().map_err(io::Error::other)?;

    let mut db_config = DbConfig::default();
    db_config.service_name = "gateway".to_string();
    db_config.database_url = config.service.database_url.clone();
    let db_pool = create_pool(db_config).await.map_err(io::Error::other)?;
    sqlx::migrate!("./migrations").run(&db_pool).await.map_err(io::Error::other)?;
    tracing::info!("database ready and migrated");

    let redis_pool = RedisPool::connect(&config.service.redis_url, None)
        .await
        .map_err(io::Error::other)?;
    let stream_log = Arc::new(StreamLog::new(redis_pool.manager()));

    let registry = Arc::new(ConnectionRegistry::new(SessionLimits {
        max_per_user: config.session.max_per_user,
        max_per_tenant: config.session.max_per_tenant,
    }));

    let dlq_repository = Arc::new(DlqRepository::new(db_pool.clone()));
    let republisher = Arc::new(StreamRepublisher::new(stream_log.clone()));

    let config = Arc::new(config);
    let app_state = AppState {
        config: config.clone(),
        db: db_pool.clone(),
        stream_log: stream_log.clone(),
        registry: registry.clone(),
        dlq: dlq_repository,
        republisher: republisher.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let outbox_config = OutboxConfig {
        poll_interval: std::time::Duration::from_millis(config.outbox.poll_interval_ms),
        batch_size: config.outbox.batch_size,
        max_retries: config.outbox.max_retries,
        backoff: config.outbox.backoff,
    };
    let outbox_consumer = OutboxConsumer::new(db_pool.clone(), stream_log.clone(), outbox_config);
    let outbox_shutdown = shutdown_rx.clone();
    tokio::spawn(async move { outbox_consumer.run(outbox_shutdown).await });

    let notifier = Arc::new(fanout::Notifier::new(
        stream_log.clone(),
        registry.clone(),
        config.session.max_frame_bytes,
    ));
    notifier.start(shutdown_rx.clone());

    let http_port = config.service.http_port;
    tracing::info!(port = http_port, "gateway http server starting");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(sse::register_routes)
            .configure(ws::register_routes)
            .configure(dlq_routes::register_routes)
    })
    .bind(("0.0.0.0", http_port))?
    .run();

    let result = server.await;
    let _ = shutdown_tx.send(true);
    result
}
