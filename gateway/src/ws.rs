//! WebSocket transport adapter. One actor per connection, mirroring the
//! teacher's `WsSession` heartbeat/stream-handler shape; the actor's address
//! is wrapped in [`WsFrameSink`] so the fanout notifier can dispatch to it
//! through the same `FrameSink` interface the SSE adapter implements.
use crate::auth::verify;
use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use connection_registry::{ConnectionRecord, FrameSink, Transport};
use event_contracts::EventEnvelope;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: String,
}

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Dispatch(EventEnvelope);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct CloseFrame(String);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct ReportStats(usize);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Subscribe { topics: Vec<String> },
    Ping,
    GetStats,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Connected { session_id: &'a str },
    Heartbeat,
    Pong,
    Stats { subscriptions: usize },
    Error { message: &'a str },
}

pub struct WsSession {
    session_id: String,
    tenant_id: Uuid,
    registry: std::sync::Arc<connection_registry::ConnectionRegistry>,
    hb: Instant,
    ping_interval: Duration,
}

pub struct WsFrameSink {
    addr: actix::Addr<WsSession>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn write_frame(&self, event: &EventEnvelope) -> Result<(), String> {
        self.addr
            .try_send(Dispatch(event.clone()))
            .map_err(|e| e.to_string())
    }

    async fn close(&self, reason: &str) {
        let _ = self.addr.try_send(CloseFrame(reason.to_string()));
    }
}

impl WsSession {
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = self.ping_interval;
        ctx.run_interval(interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > interval * 2 {
                tracing::warn!(session_id = %act.session_id, "websocket heartbeat timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
            ctx.text(serde_json::to_string(&OutboundFrame::Heartbeat).unwrap_or_default());
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        tracing::info!(session_id = %self.session_id, tenant_id = %self.tenant_id, "websocket session started");
        let connected = OutboundFrame::Connected { session_id: &self.session_id };
        ctx.text(serde_json::to_string(&connected).unwrap_or_default());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let registry = self.registry.clone();
        let session_id = self.session_id.clone();
        actix::spawn(async move {
            registry.remove(&session_id).await;
        });
    }
}

impl Handler<Dispatch> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Dispatch, ctx: &mut Self::Context) {
        if let Ok(text) = serde_json::to_string(&msg.0) {
            ctx.text(text);
        }
    }
}

impl Handler<CloseFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: CloseFrame, ctx: &mut Self::Context) {
        let error = OutboundFrame::Error { message: &msg.0 };
        ctx.text(serde_json::to_string(&error).unwrap_or_default());
        ctx.stop();
    }
}

impl Handler<ReportStats> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: ReportStats, ctx: &mut Self::Context) {
        ctx.text(serde_json::to_string(&OutboundFrame::Stats { subscriptions: msg.0 }).unwrap_or_default());
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
                let registry = self.registry.clone();
                let session_id = self.session_id.clone();
                actix::spawn(async move { registry.record_activity(&session_id).await });
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(InboundFrame::Subscribe { topics }) => {
                        let registry = self.registry.clone();
                        let session_id = self.session_id.clone();
                        let subs: HashSet<String> = topics.into_iter().collect();
                        actix::spawn(async move { registry.set_subscriptions(&session_id, subs).await });
                    }
                    Ok(InboundFrame::Ping) => {
                        ctx.text(serde_json::to_string(&OutboundFrame::Pong).unwrap_or_default());
                    }
                    Ok(InboundFrame::GetStats) => {
                        let registry = self.registry.clone();
                        let session_id = self.session_id.clone();
                        let addr = ctx.address();
                        actix::spawn(async move {
                            let count = registry.subscription_count(&session_id).await.unwrap_or(0);
                            addr.do_send(ReportStats(count));
                        });
                    }
                    Err(_) => {
                        ctx.text(
                            serde_json::to_string(&OutboundFrame::Error { message: "invalid message" })
                                .unwrap_or_default(),
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(session_id = %self.session_id, ?reason, "websocket closed by client");
                ctx.stop();
            }
            _ => {}
        }
    }
}

async fn upgrade(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<ConnectParams>,
    subscriptions: &[&str],
) -> Result<HttpResponse, Error> {
    let claims = match verify(&query.token, &state.config.service.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => return Ok(HttpResponse::Unauthorized().finish()),
    };

    let session_id = Uuid::new_v4().to_string();
    let session = WsSession {
        session_id: session_id.clone(),
        tenant_id: claims.tenant_id,
        registry: state.registry.clone(),
        hb: Instant::now(),
        ping_interval: state.config.heartbeat.websocket,
    };

    let (addr, resp) = ws::start_with_addr(session, &req, stream)?;

    let record = ConnectionRecord {
        session_id,
        user_id: claims.sub,
        tenant_id: claims.tenant_id,
        transport: Transport::WebSocket,
        connected_at: chrono::Utc::now(),
        last_activity_at: chrono::Utc::now(),
        subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
        missed_heartbeats: 0,
        sink: std::sync::Arc::new(WsFrameSink { addr }),
    };

    if !state.registry.add(record).await {
        return Ok(HttpResponse::TooManyRequests().finish());
    }

    Ok(resp)
}

#[get("/ws")]
async fn ws_main(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<ConnectParams>,
) -> Result<HttpResponse, Error> {
    upgrade(req, stream, state, query, &["all"]).await
}

#[get("/ws/orders")]
async fn ws_orders(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<ConnectParams>,
) -> Result<HttpResponse, Error> {
    upgrade(req, stream, state, query, &["order_status"]).await
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/v1/events").service(ws_main).service(ws_orders));
}
