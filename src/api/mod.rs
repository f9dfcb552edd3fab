use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod cost_guard;

/// Cost guard API routes. The caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cost-guard/summary", get(cost_guard::get_summary))
        .route("/cost-guard/progress", get(cost_guard::get_progress))
        .route("/cost-guard/contracts", get(cost_guard::get_contracts))
        .route("/cost-guard/rate-limit", get(cost_guard::get_rate_limit))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

/// The whole HTTP surface: health probes, metrics and the API.
pub fn app(state: Arc<AppState>) -> Router {
    let dashboard_origin = state.config.dashboard_origin.clone();

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-request-id"),
                ])
                .expose_headers([header::RETRY_AFTER]),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Ready once contracts can be listed; the metering API is not probed so a
/// remote outage does not take the service out of rotation.
async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.contracts.contracted_services("__readyz__").await {
        Ok(_) => "ok".into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "contract store unavailable").into_response()
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::encode_metrics(),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: baseline security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    // summaries are tenant data
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    resp
}
