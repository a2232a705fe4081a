//! `/v1/dlq/*` management surface. Every handler here requires the same
//! bearer-token principal as the event transports; there is no separate
//! operator auth scheme.
use crate::auth::{bearer_token, verify, Claims};
use crate::state::AppState;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use dlq::AlertThresholds;
use serde::Deserialize;
use uuid::Uuid;

fn authenticate(req: &HttpRequest, state: &AppState) -> Result<Claims, HttpResponse> {
    let header = req.headers().get("Authorization").and_then(|h| h.to_str().ok());
    let token = bearer_token(header).map_err(|_| HttpResponse::Unauthorized().finish())?;
    verify(token, &state.config.service.jwt_secret).map_err(|_| HttpResponse::Unauthorized().finish())
}

#[get("/stats")]
async fn stats(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    match state.dlq.stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/alerts")]
async fn alerts(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    let thresholds = AlertThresholds {
        alert_total: state.config.dlq.alert_total,
        alert_oldest_hours: state.config.dlq.alert_oldest_hours,
        alert_failure_rate: state.config.dlq.alert_failure_rate,
    };
    match state.dlq.alerts(&thresholds).await {
        Ok(alerts) => HttpResponse::Ok().json(alerts),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/events/manual-intervention")]
async fn manual_intervention(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    match state.dlq.manual_intervention_queue(1).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ReprocessQuery {
    aggregate_type: Option<String>,
    limit: Option<i64>,
}

#[post("/reprocess")]
async fn reprocess(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ReprocessQuery>,
) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    let limit = query.limit.unwrap_or(10);
    match state
        .dlq
        .batch_reprocess(query.aggregate_type.as_deref(), limit, state.republisher.as_ref())
        .await
    {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    event_id: Uuid,
    #[allow(dead_code)]
    aggregate_type: String,
    #[allow(dead_code)]
    reason: Option<String>,
}

#[post("/events/resolve")]
async fn resolve(req: HttpRequest, state: web::Data<AppState>, body: web::Json<ResolveBody>) -> HttpResponse {
    let claims = match authenticate(&req, &state) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    match state.dlq.manual_resolve(body.event_id, &claims.sub.to_string()).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => HttpResponse::BadRequest().body(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct CleanupQuery {
    days_to_keep: Option<i64>,
}

#[post("/cleanup")]
async fn cleanup(req: HttpRequest, state: web::Data<AppState>, query: web::Query<CleanupQuery>) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    let days = query.days_to_keep.unwrap_or(state.config.dlq.expire_days);
    match state.dlq.expire(days).await {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "expired": count })),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/monitoring/dashboard")]
async fn dashboard(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Err(resp) = authenticate(&req, &state) {
        return resp;
    };
    let thresholds = AlertThresholds {
        alert_total: state.config.dlq.alert_total,
        alert_oldest_hours: state.config.dlq.alert_oldest_hours,
        alert_failure_rate: state.config.dlq.alert_failure_rate,
    };

    let stats = state.dlq.stats().await;
    let alerts = state.dlq.alerts(&thresholds).await;
    let manual_intervention = state.dlq.manual_intervention_queue(1).await;

    match (stats, alerts, manual_intervention) {
        (Ok(stats), Ok(alerts), Ok(manual_intervention)) => HttpResponse::Ok().json(serde_json::json!({
            "stats": stats,
            "alerts": alerts,
            "manual_intervention_count": manual_intervention.len(),
            "connected_sessions": state.registry.total_sessions().await,
        })),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

/// Unauthenticated by design — load balancers and orchestrators probe this
/// without a token.
#[get("/health")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let body = serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "connected_sessions": state.registry.total_sessions().await,
    });
    if db_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1/dlq")
            .service(stats)
            .service(alerts)
            .service(manual_intervention)
            .service(reprocess)
            .service(resolve)
            .service(cleanup)
            .service(dashboard)
            .service(health),
    );
}
