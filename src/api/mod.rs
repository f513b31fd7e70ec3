//! API endpoints for the gateway guard service.
//!
//! This module provides the per-request decision endpoint consumed by the
//! serving layer and the admin surface backing the operator UI: stats,
//! threat analysis, blacklist management and a synthetic rate-limit test.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::core::access_lists::{AccessEntry, AccessListError, AccessListManager, ListKind};
use crate::core::counter_store::CounterStore;
use crate::core::gateway::{Gateway, RequestContext, Verdict, VerdictReason};
use crate::core::threats::ThreatAnalyzer;
use crate::models::{Config, EndpointLimit, RateLimitConfig};

pub struct ApiState {
    pub gateway: Arc<Gateway>,
    pub access_lists: Arc<AccessListManager>,
    pub analyzer: Arc<ThreatAnalyzer>,
    pub store: Arc<dyn CounterStore>,
    pub config: Arc<Config>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/check").route(web::post().to(check)))
            .service(
                web::scope("/admin")
                    .service(web::resource("/stats").route(web::get().to(stats)))
                    .service(
                        web::resource("/threats/analysis")
                            .route(web::get().to(threat_analysis)),
                    )
                    .service(
                        web::resource("/blacklist")
                            .route(web::get().to(list_blacklist))
                            .route(web::post().to(add_to_blacklist)),
                    )
                    .service(
                        web::resource("/blacklist/{ip}")
                            .route(web::delete().to(remove_from_blacklist)),
                    )
                    .service(
                        web::resource("/test-rate-limit")
                            .route(web::post().to(test_rate_limit)),
                    ),
            ),
    );
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Decision request from the serving layer
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub client_ip: String,
    pub principal_id: Option<String>,
    pub endpoint_path: String,
    pub method: String,
}

/// Gateway statistics for the admin dashboard
#[derive(Serialize)]
struct StatsResponse {
    default_limits: RateLimitConfig,
    endpoint_limits: HashMap<String, EndpointLimit>,
    whitelist_count: usize,
    blacklist_count: usize,
    store_connected: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisQuery {
    hours: Option<u64>,
}

/// Blacklist creation request
#[derive(Debug, Serialize, Deserialize)]
pub struct BlacklistAddRequest {
    pub ip: String,
    pub duration_hours: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Serialize)]
struct BlacklistAddResponse {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestRateLimitRequest {
    pub endpoint_path: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error: message.into(),
    }
}

/// Check the externally-provisioned admin credential on mutating routes.
/// With no token configured, admission control is left to the deployment.
fn authorize_admin(req: &HttpRequest, config: &Config) -> Result<(), HttpResponse> {
    let Some(expected) = config.server.admin_token.as_deref() else {
        return Ok(());
    };
    let supplied = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        Err(HttpResponse::Unauthorized().json(error_body("admin token missing or invalid")))
    }
}

fn access_list_error_response(err: AccessListError) -> HttpResponse {
    match err {
        AccessListError::InvalidInput(msg) => HttpResponse::BadRequest().json(error_body(msg)),
        AccessListError::NotFound(msg) => HttpResponse::NotFound().json(error_body(msg)),
        AccessListError::Conflict(msg) => HttpResponse::Conflict().json(error_body(msg)),
        AccessListError::Store(msg) => {
            HttpResponse::ServiceUnavailable().json(error_body(msg))
        }
    }
}

fn verdict_response(verdict: Verdict) -> HttpResponse {
    let mut builder = if verdict.allowed() {
        HttpResponse::Ok()
    } else if verdict.reason == VerdictReason::Blacklisted {
        HttpResponse::Forbidden()
    } else {
        HttpResponse::TooManyRequests()
    };
    if let Some(remaining) = verdict.remaining {
        builder.insert_header(("X-RateLimit-Remaining", remaining.to_string()));
    }
    if let Some(retry_after) = verdict.retry_after_seconds {
        builder.insert_header(("Retry-After", retry_after.to_string()));
    }
    builder.json(verdict)
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Per-request decision endpoint
async fn check(state: web::Data<ApiState>, req: web::Json<CheckRequest>) -> impl Responder {
    let client_ip: IpAddr = match req.client_ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("invalid client_ip: {}", req.client_ip)))
        }
    };

    let ctx = RequestContext {
        client_ip,
        principal_id: req.principal_id.clone(),
        endpoint_path: req.endpoint_path.clone(),
        method: req.method.clone(),
    };
    verdict_response(state.gateway.evaluate(&ctx).await)
}

/// Gateway statistics endpoint
async fn stats(state: web::Data<ApiState>) -> impl Responder {
    let (whitelist_count, blacklist_count) = state.access_lists.counts().await;
    HttpResponse::Ok().json(StatsResponse {
        default_limits: state.config.rate_limit.clone(),
        endpoint_limits: state.config.endpoint_limits.clone(),
        whitelist_count,
        blacklist_count,
        // Honest degradation: reported false during an outage instead of
        // failing the whole endpoint.
        store_connected: state.store.ping().await,
    })
}

/// Threat analysis endpoint
async fn threat_analysis(
    state: web::Data<ApiState>,
    query: web::Query<AnalysisQuery>,
) -> impl Responder {
    let hours = query.hours.unwrap_or(24);
    if hours == 0 {
        return HttpResponse::BadRequest().json(error_body("hours must be positive"));
    }
    HttpResponse::Ok().json(state.analyzer.analyze(hours).await)
}

/// List active blacklist entries
async fn list_blacklist(state: web::Data<ApiState>) -> impl Responder {
    let entries: Vec<AccessEntry> = state.access_lists.list(ListKind::Deny).await;
    HttpResponse::Ok().json(entries)
}

/// Add a blacklist entry
async fn add_to_blacklist(
    http_req: HttpRequest,
    state: web::Data<ApiState>,
    req: web::Json<BlacklistAddRequest>,
) -> impl Responder {
    if let Err(resp) = authorize_admin(&http_req, &state.config) {
        return resp;
    }

    let reason = req.reason.as_deref().unwrap_or("");
    match state
        .access_lists
        .add_to_blacklist(&req.ip, req.duration_hours, reason)
        .await
    {
        Ok(id) => HttpResponse::Created().json(BlacklistAddResponse { id: id.to_string() }),
        Err(e) => access_list_error_response(e),
    }
}

/// Remove a blacklist entry
async fn remove_from_blacklist(
    http_req: HttpRequest,
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    if let Err(resp) = authorize_admin(&http_req, &state.config) {
        return resp;
    }

    match state.access_lists.remove_from_blacklist(&path).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => access_list_error_response(e),
    }
}

/// Synthetic rate-limit evaluation against the caller's own identity
async fn test_rate_limit(
    http_req: HttpRequest,
    state: web::Data<ApiState>,
    req: Option<web::Json<TestRateLimitRequest>>,
) -> impl Responder {
    if let Err(resp) = authorize_admin(&http_req, &state.config) {
        return resp;
    }

    let peer = http_req
        .connection_info()
        .realip_remote_addr()
        .and_then(|addr| addr.parse::<IpAddr>().ok());
    let Some(client_ip) = peer else {
        return HttpResponse::BadRequest().json(error_body("caller address unavailable"));
    };

    let endpoint_path = req
        .and_then(|r| r.endpoint_path.clone())
        .unwrap_or_else(|| "/".to_string());
    let ctx = RequestContext {
        client_ip,
        principal_id: None,
        endpoint_path,
        method: "POST".to_string(),
    };
    let verdict = state.gateway.evaluate(&ctx).await;
    HttpResponse::Ok().json(verdict)
}
