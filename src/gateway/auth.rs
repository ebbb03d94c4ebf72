//! Session gate middleware
//!
//! Every request passes through here first:
//! - Resolve the tenant from the `Host` header
//! - Classify the path; public paths continue immediately
//! - Protected paths without a session cookie redirect to login
//! - Otherwise verify the token once; on success attach the session,
//!   on failure clear the cookie and redirect to login

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::session::{AuthFailure, AuthResult, SessionVerifier};
use crate::config::Config;
use crate::routes::{RouteClass, RouteClassifier};
use crate::tenant::{TenantDescriptor, TenantRegistry};
use crate::{Error, Result};

/// Tenant resolved for the current request. Always present downstream.
#[derive(Debug, Clone)]
pub struct TenantContext(pub Arc<TenantDescriptor>);

/// Verified session for the current request.
///
/// Only inserted when the identity service accepted the token carried by
/// this same request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionContext {
    /// Identity payload from the identity service
    pub user: Value,
    /// Partition key the session was verified against
    pub database: String,
}

/// Shared state for [`auth_middleware`]
#[derive(Debug)]
pub struct AuthGateway {
    tenants: Arc<TenantRegistry>,
    routes: RouteClassifier,
    verifier: SessionVerifier,
    login_path: String,
    cookie_name: String,
}

impl AuthGateway {
    /// Assemble the gate from its parts.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the login path is itself protected,
    /// which would redirect forever.
    pub fn new(
        tenants: Arc<TenantRegistry>,
        routes: RouteClassifier,
        verifier: SessionVerifier,
        login_path: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Result<Self> {
        let login_path = login_path.into();
        if routes.classify(&login_path) == RouteClass::Protected {
            return Err(Error::Config(format!(
                "login path {login_path} is protected; requests would redirect forever"
            )));
        }

        Ok(Self {
            tenants,
            routes,
            verifier,
            login_path,
            cookie_name: cookie_name.into(),
        })
    }

    /// Build the gate from configuration
    pub fn from_config(config: &Config, tenants: Arc<TenantRegistry>) -> Result<Self> {
        let verifier = SessionVerifier::new(
            &config.backend.base_url,
            &config.session.cookie_name,
            config.backend.verify_timeout,
        )?;
        Self::new(
            tenants,
            RouteClassifier::from_config(&config.routes),
            verifier,
            config.routes.login_path.clone(),
            config.session.cookie_name.clone(),
        )
    }

    /// Tenant for a request. The `?site=` override is honoured on public
    /// paths only; protected paths are pinned to the `Host` header.
    fn resolve_tenant(&self, request: &Request<Body>, class: RouteClass) -> Arc<TenantDescriptor> {
        let host = request_host(request);
        match class {
            RouteClass::Public => self.tenants.resolve_with_query(host, request.uri().query()),
            RouteClass::Protected => self.tenants.resolve(host),
        }
    }

    /// Redirect to login without touching cookies
    fn login_redirect(&self) -> Response {
        (
            StatusCode::FOUND,
            [(header::LOCATION, self.login_path.as_str())],
        )
            .into_response()
    }

    /// Delete the session cookie and redirect to login, always together
    fn clear_and_redirect(&self) -> Response {
        let mut response = self.login_redirect();
        let expired = format!(
            "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.cookie_name
        );
        match HeaderValue::from_str(&expired) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Cookie name is not a valid header value"),
        }
        response
    }
}

/// Session gate middleware
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGateway>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let class = gate.routes.classify(request.uri().path());
    let tenant = gate.resolve_tenant(&request, class);
    request
        .extensions_mut()
        .insert(TenantContext(Arc::clone(&tenant)));

    if class == RouteClass::Public {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let Some(token) = session_token(request.headers(), &gate.cookie_name) else {
        debug!(path = %path, tenant = %tenant.id, "No session cookie on protected path");
        return gate.login_redirect();
    };

    match gate.verifier.verify(&token, &tenant).await {
        AuthResult::Authenticated { identity, tenant } => {
            debug!(path = %path, tenant = %tenant.id, "Authenticated request");
            request.extensions_mut().insert(SessionContext {
                user: identity,
                database: tenant.database.clone(),
            });
            next.run(request).await
        }
        AuthResult::Unauthenticated { reason } => {
            match reason {
                AuthFailure::InvalidOrExpired => {
                    info!(path = %path, tenant = %tenant.id, reason = %reason, "Session rejected, clearing cookie");
                }
                AuthFailure::VerificationError => {
                    warn!(path = %path, tenant = %tenant.id, reason = %reason, "Session could not be verified, clearing cookie");
                }
            }
            gate.clear_and_redirect()
        }
    }
}

/// `Host` header, or the URI authority for HTTP/2 requests
fn request_host(request: &Request<Body>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(axum::http::uri::Authority::as_str))
        .unwrap_or("")
}

/// Extract a non-empty cookie value by name from all `Cookie` headers
pub(crate) fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == cookie_name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
