//! Session verification against the backend identity service
//!
//! One outbound `GET /api/auth/me` per verification, carrying the session
//! token as a cookie and the tenant's partition key as `X-Site-Database`.
//! No retries and no caching: a slow or unreachable identity service turns
//! into `Unauthenticated` within the configured timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, header};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::tenant::TenantDescriptor;
use crate::{Error, Result};

/// Header carrying the tenant partition key to the backend
pub const DATABASE_HEADER: &str = "x-site-database";

/// Identity endpoint, relative to the backend base URL
pub const WHO_AM_I_PATH: &str = "/api/auth/me";

/// Why a session was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The identity service answered with a non-2xx status
    InvalidOrExpired,
    /// The identity service was unreachable, timed out or answered garbage
    VerificationError,
}

impl AuthFailure {
    /// Stable label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidOrExpired => "invalid-or-expired",
            Self::VerificationError => "verification-error",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one verification
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// The identity service accepted the token
    Authenticated {
        /// Identity payload as returned by the service
        identity: Value,
        /// Tenant the token was verified against
        tenant: Arc<TenantDescriptor>,
    },
    /// The token was not accepted
    Unauthenticated {
        /// Failure reason
        reason: AuthFailure,
    },
}

impl AuthResult {
    /// Whether the token was accepted
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    fn failed(reason: AuthFailure) -> Self {
        Self::Unauthenticated { reason }
    }
}

/// Client for the identity service's who-am-I endpoint
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    client: Client,
    me_url: Url,
    cookie_name: String,
}

impl SessionVerifier {
    /// Create a verifier.
    ///
    /// `timeout` bounds the whole call, connect included.
    pub fn new(base_url: &str, cookie_name: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::IdentityService(e.to_string()))?;

        Self::with_client(client, base_url, cookie_name)
    }

    /// Create a verifier around an existing client
    pub fn with_client(client: Client, base_url: &str, cookie_name: &str) -> Result<Self> {
        let me_url = endpoint_url(base_url, WHO_AM_I_PATH)?;
        Ok(Self {
            client,
            me_url,
            cookie_name: cookie_name.to_string(),
        })
    }

    /// Verify `token` for `tenant`. Exactly one outbound call, never errors.
    pub async fn verify(&self, token: &str, tenant: &Arc<TenantDescriptor>) -> AuthResult {
        let Ok(cookie) = header::HeaderValue::from_str(&format!("{}={token}", self.cookie_name))
        else {
            info!(tenant = %tenant.id, reason = %AuthFailure::InvalidOrExpired, "Session token is not a valid cookie value");
            return AuthResult::failed(AuthFailure::InvalidOrExpired);
        };

        let response = self
            .client
            .get(self.me_url.clone())
            .header(header::COOKIE, cookie)
            .header(DATABASE_HEADER, tenant.database.as_str())
            .header(header::ACCEPT, "application/json")
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    tenant = %tenant.id,
                    timeout = e.is_timeout(),
                    error = %e,
                    reason = %AuthFailure::VerificationError,
                    "Identity service unreachable"
                );
                return AuthResult::failed(AuthFailure::VerificationError);
            }
        };

        let status = response.status();
        if !status.is_success() {
            info!(
                tenant = %tenant.id,
                status = status.as_u16(),
                reason = %AuthFailure::InvalidOrExpired,
                "Session rejected by identity service"
            );
            return AuthResult::failed(AuthFailure::InvalidOrExpired);
        }

        match response.json::<Value>().await {
            Ok(identity) => {
                debug!(tenant = %tenant.id, "Session verified");
                AuthResult::Authenticated {
                    identity,
                    tenant: Arc::clone(tenant),
                }
            }
            Err(e) => {
                warn!(
                    tenant = %tenant.id,
                    error = %e,
                    reason = %AuthFailure::VerificationError,
                    "Identity service returned a malformed body"
                );
                AuthResult::failed(AuthFailure::VerificationError)
            }
        }
    }
}

/// Join an absolute endpoint path onto the backend base URL, keeping any
/// path prefix the base already carries.
pub(crate) fn endpoint_url(base_url: &str, path: &str) -> Result<Url> {
    let joined = format!("{}{path}", base_url.trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| Error::Config(format!("Invalid backend URL '{joined}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tenant(database: &str) -> Arc<TenantDescriptor> {
        Arc::new(TenantDescriptor {
            id: "acme".to_string(),
            host: "acme.com".to_string(),
            directory: "acme".to_string(),
            database: database.to_string(),
            theme: None,
            features: vec![],
        })
    }

    fn verifier(server: &MockServer) -> SessionVerifier {
        SessionVerifier::new(&server.uri(), "auth-token", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let url = endpoint_url("http://api.internal:3001/v2/", WHO_AM_I_PATH).unwrap();
        assert_eq!(url.as_str(), "http://api.internal:3001/v2/api/auth/me");
        assert!(endpoint_url("::nope", WHO_AM_I_PATH).is_err());
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(AuthFailure::InvalidOrExpired.to_string(), "invalid-or-expired");
        assert_eq!(AuthFailure::VerificationError.to_string(), "verification-error");
    }

    #[tokio::test]
    async fn test_accepted_token_yields_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .and(header_eq("cookie", "auth-token=tok-1"))
            .and(header_eq("x-site-database", "acme_db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = verifier(&server).verify("tok-1", &tenant("acme_db")).await;
        match result {
            AuthResult::Authenticated { identity, tenant } => {
                assert_eq!(identity, json!({"id": "u1"}));
                assert_eq!(tenant.database, "acme_db");
            }
            AuthResult::Unauthenticated { reason } => panic!("unexpected failure: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_token_is_invalid_or_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("User not found"))
            .expect(1)
            .mount(&server)
            .await;

        let result = verifier(&server).verify("stale", &tenant("acme_db")).await;
        assert!(matches!(
            result,
            AuthResult::Unauthenticated {
                reason: AuthFailure::InvalidOrExpired
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_verification_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = verifier(&server).verify("tok", &tenant("acme_db")).await;
        assert!(matches!(
            result,
            AuthResult::Unauthenticated {
                reason: AuthFailure::VerificationError
            }
        ));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "u1"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let verifier =
            SessionVerifier::new(&server.uri(), "auth-token", Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let result = verifier.verify("tok", &tenant("acme_db")).await;

        assert!(!result.is_authenticated());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_verification_error() {
        // Port 9 (discard) on loopback is closed in test environments
        let verifier =
            SessionVerifier::new("http://127.0.0.1:9", "auth-token", Duration::from_secs(1)).unwrap();
        let result = verifier.verify("tok", &tenant("acme_db")).await;
        assert!(matches!(
            result,
            AuthResult::Unauthenticated {
                reason: AuthFailure::VerificationError
            }
        ));
    }

    #[tokio::test]
    async fn test_token_with_control_chars_is_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
            .expect(0)
            .mount(&server)
            .await;

        let result = verifier(&server).verify("bad\ntoken", &tenant("acme_db")).await;
        assert!(matches!(
            result,
            AuthResult::Unauthenticated {
                reason: AuthFailure::InvalidOrExpired
            }
        ));
    }
}
