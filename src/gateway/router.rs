//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::auth::{AuthGateway, SessionContext, TenantContext, auth_middleware};
use super::proxy::{self, TenantProxy};
use crate::tenant::TenantRegistry;

/// Shared application state
pub struct AppState {
    /// Session gate
    pub gateway: Arc<AuthGateway>,
    /// Tenant table (shared with the gate)
    pub tenants: Arc<TenantRegistry>,
    /// API forwarding
    pub proxy: TenantProxy,
    /// Maximum request body size for forwarded calls
    pub max_body_size: usize,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

/// Create the router with the built-in page context handler as fallback
pub fn create_router(state: Arc<AppState>) -> Router {
    create_router_with_pages(state, Router::new().fallback(context_handler))
}

/// Create the router around caller-supplied page routes.
///
/// Pages, the forwarding endpoints and `/health` all sit behind the session
/// gate; handlers read [`TenantContext`] and [`SessionContext`] from request
/// extensions.
pub fn create_router_with_pages(state: Arc<AppState>, pages: Router) -> Router {
    let gateway = Arc::clone(&state.gateway);
    let max_body_size = state.max_body_size;
    let request_timeout = state.request_timeout;

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(proxy::login_handler))
        .route("/api/auth/check-admin", get(proxy::check_admin_handler))
        .route("/api/auth/create-admin", post(proxy::create_admin_handler))
        .route("/api/auth/me", get(proxy::session_check_handler))
        .route("/api/posts/{slug}", get(proxy::post_handler))
        .with_state(state);

    api.merge(pages)
        .layer(middleware::from_fn_with_state(gateway, auth_middleware))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tenants": state.tenants.len(),
    }))
}

/// Default page handler: reports what the gate attached to the request
pub async fn context_handler(request: Request<Body>) -> impl IntoResponse {
    let tenant = request
        .extensions()
        .get::<TenantContext>()
        .map(|TenantContext(t)| Arc::clone(t));
    let session = request.extensions().get::<SessionContext>().cloned();

    Json(json!({
        "path": request.uri().path(),
        "tenant": tenant.as_deref(),
        "authenticated": session.is_some(),
        "user": session.as_ref().map(|s| &s.user),
        "database": session.as_ref().map(|s| s.database.as_str()),
    }))
}
