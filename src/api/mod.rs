use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ServiceError;
use crate::health::{HealthProbe, SystemHealth};
use crate::metrics::Metrics;
use crate::service::OrderService;

// ============================================================================
// HTTP API
// ============================================================================
//
//   GET    /order/{order_uid}        order lookup (cache-aside read)
//   DELETE /cache/order/{order_uid}  drop a cached snapshot
//   GET    /health                   store + cache probes
//   GET    /metrics                  Prometheus text format
//
// ============================================================================

pub struct AppState {
    pub service: Arc<OrderService>,
    pub metrics: Arc<Metrics>,
    pub probes: Vec<Arc<dyn HealthProbe>>,
    pub request_timeout: Duration,
    pub app_name: String,
    pub app_version: String,
}

#[derive(Serialize)]
struct ErrorBody {
    reason: &'static str,
}

fn reason(reason: &'static str) -> ErrorBody {
    ErrorBody { reason }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/order/{order_uid}", web::get().to(get_order))
        .route("/order/", web::get().to(empty_order_uid))
        .route("/order", web::get().to(empty_order_uid))
        .route("/cache/order/{order_uid}", web::delete().to(invalidate_order))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

async fn get_order(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let order_uid = path.into_inner();
    // blank counts as empty; otherwise the id is used exactly as given
    if order_uid.trim().is_empty() {
        return HttpResponse::BadRequest().json(reason("empty order_uid param"));
    }

    let lookup = tokio::time::timeout(state.request_timeout, state.service.fetch(&order_uid)).await;

    match lookup {
        Ok(Ok(order)) => HttpResponse::Ok().json(order),
        Ok(Err(ServiceError::NotFound(_))) => HttpResponse::NotFound().json(reason("order not found")),
        Ok(Err(e)) => {
            tracing::error!(order_uid = %order_uid, error = %e, "Order lookup failed");
            HttpResponse::InternalServerError().json(reason("internal error"))
        }
        Err(_) => {
            tracing::error!(
                order_uid = %order_uid,
                timeout_ms = state.request_timeout.as_millis() as u64,
                "Order lookup exceeded request deadline"
            );
            HttpResponse::InternalServerError().json(reason("internal error"))
        }
    }
}

async fn empty_order_uid() -> HttpResponse {
    HttpResponse::BadRequest().json(reason("empty order_uid param"))
}

async fn invalidate_order(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let order_uid = path.into_inner();

    match state.service.invalidate(&order_uid).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => {
            tracing::error!(order_uid = %order_uid, error = %e, "Cache invalidation failed");
            HttpResponse::InternalServerError().json(reason("internal error"))
        }
    }
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let health = SystemHealth::collect(&state.probes).await;
    let report = health.report(&state.app_name, &state.app_version);

    if health.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(report)
    } else {
        HttpResponse::Ok().json(report)
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    match state.metrics.encode_text() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
