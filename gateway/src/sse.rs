//! SSE transport adapter. Each connection owns a bounded channel; the
//! fanout notifier's dispatch tasks write frames into it via [`SseSink`],
//! and the HTTP response streams it out as `text/event-stream`.
use crate::auth::{bearer_token, verify};
use crate::state::AppState;
use actix_web::{get, web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use bytes::Bytes;
use connection_registry::{ConnectionRecord, FrameSink, Transport};
use event_contracts::EventEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

pub struct SseSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl FrameSink for SseSink {
    async fn write_frame(&self, event: &EventEnvelope) -> Result<(), String> {
        let data = serde_json::to_string(event).map_err(|e| e.to_string())?;
        let frame = format!("event: {}\ndata: {}\n\n", event.event_kind(), data);
        self.tx
            .send(Bytes::from(frame))
            .await
            .map_err(|_| "sse channel closed".to_string())
    }

    async fn close(&self, reason: &str) {
        let _ = self
            .tx
            .send(Bytes::from(format!("event: error\ndata: {{\"reason\":\"{reason}\"}}\n\n")))
            .await;
    }
}

async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<(Uuid, Uuid), HttpResponse> {
    let header = req.headers().get("Authorization").and_then(|h| h.to_str().ok());
    let token = bearer_token(header).map_err(|_| HttpResponse::Unauthorized().finish())?;
    let claims = verify(token, &state.config.service.jwt_secret)
        .map_err(|_| HttpResponse::Unauthorized().finish())?;
    Ok((claims.sub, claims.tenant_id))
}

async fn stream(
    req: HttpRequest,
    state: web::Data<AppState>,
    subscriptions: &[&str],
    heartbeat_interval: Duration,
) -> HttpResponse {
    let (user_id, tenant_id) = match authenticate(&req, &state).await {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let session_id = Uuid::new_v4().to_string();
    let sink: Arc<dyn FrameSink> = Arc::new(SseSink { tx: tx.clone() });

    let record = ConnectionRecord {
        session_id: session_id.clone(),
        user_id,
        tenant_id,
        transport: Transport::Sse,
        connected_at: chrono::Utc::now(),
        last_activity_at: chrono::Utc::now(),
        subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
        missed_heartbeats: 0,
        sink,
    };

    if !state.registry.add(record).await {
        return HttpResponse::TooManyRequests().body("session limit reached");
    }

    info!(session_id = %session_id, user_id = %user_id, tenant_id = %tenant_id, "sse session connected");

    // Heartbeats double as the liveness probe for this connection: a failed
    // send means the client went away, so the task deregisters the session
    // and stops instead of ticking forever against a dead channel.
    let heartbeat_registry = state.registry.clone();
    let heartbeat_tx = tx.clone();
    let heartbeat_session = session_id.clone();
    actix_rt::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            if heartbeat_tx
                .send(Bytes::from_static(b"event: heartbeat\ndata: {}\n\n"))
                .await
                .is_ok()
            {
                heartbeat_registry.record_activity(&heartbeat_session).await;
            } else {
                heartbeat_registry.remove(&heartbeat_session).await;
                break;
            }
        }
    });

    let body_registry = state.registry.clone();
    let body_session = session_id.clone();
    let stream = ReceiverStream::new(rx).map(Ok::<_, actix_web::Error>).then(move |frame| {
        let registry = body_registry.clone();
        let session = body_session.clone();
        async move {
            registry.record_activity(&session).await;
            frame
        }
    });

    HttpResponse::Ok()
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("X-Accel-Buffering", "no"))
        .streaming(stream)
}

#[get("/stream")]
async fn stream_main(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    stream(req, state.clone(), &["all"], state.config.heartbeat.sse_main).await
}

#[get("/stream/orders")]
async fn stream_orders(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    stream(req, state.clone(), &["order_status"], state.config.heartbeat.sse_orders).await
}

#[get("/stream/notifications")]
async fn stream_notifications(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    stream(
        req,
        state.clone(),
        &["notification", "all"],
        state.config.heartbeat.sse_notifications,
    )
    .await
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/events")
            .service(stream_main)
            .service(stream_orders)
            .service(stream_notifications),
    );
}
