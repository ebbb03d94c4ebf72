//! Tenant-scoped API forwarding
//!
//! Forwards a fixed set of auth and content endpoints to the backend with the
//! tenant partition header attached, relaying the backend's status and body
//! verbatim. Only `Content-Type` (and `Set-Cookie` for login) survive from the
//! backend response.
//!
//! Trust boundary: with `trust_database_header` enabled, any caller can pick
//! the partition via `X-Site-Database`. The handlers here are only mounted
//! behind [`auth_middleware`](super::auth::auth_middleware), so anything past
//! login and admin bootstrap must sit under a protected prefix.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, Request, header, request::Parts},
    response::Response,
};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::auth::{TenantContext, session_token};
use super::router::AppState;
use super::session::{DATABASE_HEADER, endpoint_url};
use crate::config::Config;
use crate::{Error, Result};

const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";

/// How a forwarded response is relayed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relay {
    /// Propagate the backend's `Set-Cookie` headers
    pub set_cookie: bool,
    /// Forward the inbound session cookie to the backend
    pub session_cookie: bool,
    /// Content type when the backend sends none
    pub default_content_type: &'static str,
}

impl Relay {
    /// Status, body and content type only
    pub const PLAIN: Self = Self {
        set_cookie: false,
        session_cookie: false,
        default_content_type: APPLICATION_JSON,
    };

    /// Login: relays `Set-Cookie`, defaults to `text/plain`
    pub const LOGIN: Self = Self {
        set_cookie: true,
        session_cookie: false,
        default_content_type: TEXT_PLAIN,
    };

    /// Session check: carries the caller's session cookie
    pub const SESSION: Self = Self {
        set_cookie: false,
        session_cookie: true,
        default_content_type: APPLICATION_JSON,
    };
}

/// Forwards API calls to the backend under a tenant partition
#[derive(Debug, Clone)]
pub struct TenantProxy {
    client: Client,
    base_url: String,
    default_database: String,
    trust_database_header: bool,
    cookie_name: String,
}

impl TenantProxy {
    /// Create a proxy
    pub fn new(
        base_url: &str,
        default_database: &str,
        trust_database_header: bool,
        cookie_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        // Validate early so a bad base URL fails at startup
        endpoint_url(base_url, "/")?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            default_database: default_database.to_string(),
            trust_database_header,
            cookie_name: cookie_name.to_string(),
        })
    }

    /// Create a proxy from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.backend.base_url,
            &config.proxy.default_database,
            config.proxy.trust_database_header,
            &config.session.cookie_name,
            config.backend.proxy_timeout,
        )
    }

    /// Partition key for a forwarded call
    #[must_use]
    pub fn partition_key(&self, headers: &HeaderMap, tenant: Option<&TenantContext>) -> String {
        if self.trust_database_header {
            return headers
                .get(DATABASE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map_or_else(|| self.default_database.clone(), str::to_string);
        }

        tenant.map_or_else(|| self.default_database.clone(), |ctx| ctx.0.database.clone())
    }

    /// Forward `method path` with an optional JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if the backend is unreachable or the
    /// response body cannot be read. Backend error statuses are not errors;
    /// they are relayed as-is.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        parts: &Parts,
        relay: Relay,
    ) -> Result<Response> {
        let url = endpoint_url(&self.base_url, path)?;
        self.forward_url(method, url, body, parts, relay).await
    }

    async fn forward_url(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        parts: &Parts,
        relay: Relay,
    ) -> Result<Response> {
        let database = self.partition_key(&parts.headers, parts.extensions.get::<TenantContext>());
        debug!(method = %method, url = %url, database = %database, "Forwarding to backend");

        let mut outbound = self
            .client
            .request(method, url.clone())
            .header(DATABASE_HEADER, database.as_str());

        if let Some(body) = body {
            outbound = outbound.json(body);
        }

        if relay.session_cookie {
            if let Some(token) = session_token(&parts.headers, &self.cookie_name) {
                outbound = outbound.header(header::COOKIE, format!("{}={token}", self.cookie_name));
            }
        }

        let response = outbound.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Backend unreachable");
            Error::Backend(e.to_string())
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(relay.default_content_type));
        let cookies: Vec<HeaderValue> = if relay.set_cookie {
            response
                .headers()
                .get_all(header::SET_COOKIE)
                .iter()
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let bytes = response.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to read backend response");
            Error::Backend(e.to_string())
        })?;

        let mut relayed = Response::new(Body::from(bytes));
        *relayed.status_mut() = status;
        relayed.headers_mut().insert(header::CONTENT_TYPE, content_type);
        for cookie in cookies {
            relayed.headers_mut().append(header::SET_COOKIE, cookie);
        }
        Ok(relayed)
    }
}

fn parse_json_body(bytes: &Bytes) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::BadRequest(format!("expected JSON body: {e}")))
}

/// POST /api/auth/login
pub(super) async fn login_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, body) = read_request(request, state.max_body_size).await?;
    let body = parse_json_body(&body)?;
    state
        .proxy
        .forward(Method::POST, "/api/auth/login", Some(&body), &parts, Relay::LOGIN)
        .await
}

/// GET /api/auth/check-admin
pub(super) async fn check_admin_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, _) = request.into_parts();
    state
        .proxy
        .forward(Method::GET, "/api/auth/check-admin", None, &parts, Relay::PLAIN)
        .await
}

/// POST /api/auth/create-admin
pub(super) async fn create_admin_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, body) = read_request(request, state.max_body_size).await?;
    let body = parse_json_body(&body)?;
    state
        .proxy
        .forward(Method::POST, "/api/auth/create-admin", Some(&body), &parts, Relay::PLAIN)
        .await
}

/// GET /api/auth/me
pub(super) async fn session_check_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, _) = request.into_parts();
    state
        .proxy
        .forward(Method::GET, "/api/auth/me", None, &parts, Relay::SESSION)
        .await
}

/// GET /api/posts/{slug}
pub(super) async fn post_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    request: Request<Body>,
) -> Result<Response> {
    if slug.is_empty() || slug == "." || slug == ".." {
        return Err(Error::BadRequest(format!("invalid slug {slug:?}")));
    }

    let mut url = endpoint_url(&state.proxy.base_url, "/api/posts")?;
    url.path_segments_mut()
        .map_err(|()| Error::Internal("backend URL cannot carry a path".to_string()))?
        .push(&slug);

    let (parts, _) = request.into_parts();
    state
        .proxy
        .forward_url(Method::GET, url, None, &parts, Relay::PLAIN)
        .await
}

async fn read_request(request: Request<Body>, limit: usize) -> Result<(Parts, Bytes)> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| Error::BadRequest(format!("failed to read body: {e}")))?;
    Ok((parts, bytes))
}
