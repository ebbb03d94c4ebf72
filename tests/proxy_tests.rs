//! Tests for the tenant-scoped forwarding endpoints

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tenant_gateway::config::{Config, SiteConfig};
use tenant_gateway::gateway::Gateway;
use tower::ServiceExt;
use wiremock::matchers::{body_json, header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(backend: &str) -> Config {
    let mut config = Config::default();
    config.backend.base_url = backend.to_string();
    config.tenants.sites.insert(
        "acme.com".to_string(),
        SiteConfig {
            id: "acme".to_string(),
            database: Some("acme_db".to_string()),
            ..Default::default()
        },
    );
    config
}

fn app(backend: &str) -> Router {
    Gateway::new(config(backend)).unwrap().router()
}

fn post_json(uri: &str, database: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "acme.com")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(db) = database {
        builder = builder.header("x-site-database", db);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn text_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Login forwards body and partition header, relays status, body and cookies
#[tokio::test]
async fn test_login_relays_set_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(header_eq("x-site-database", "acme_db"))
        .and(body_json(json!({"email": "a@acme.com", "password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"ok":true}"#, "application/json")
                .append_header("set-cookie", "auth-token=new-token; Path=/; HttpOnly")
                .append_header("x-internal-node", "api-3"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(post_json(
            "/api/auth/login",
            Some("acme_db"),
            r#"{"email":"a@acme.com","password":"pw"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::SET_COOKIE).unwrap(),
        "auth-token=new-token; Path=/; HttpOnly"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert!(!response.headers().contains_key("x-internal-node"));
    assert_eq!(text_body(response).await, r#"{"ok":true}"#);
}

/// Without the header the fixed default partition is used
#[tokio::test]
async fn test_login_defaults_partition() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(header_eq("x-site-database", "codersinflow"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(post_json("/api/auth/login", None, r#"{"email":"x","password":"y"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(text_body(response).await, "Invalid credentials");
}

/// Backend error statuses and bodies come through verbatim; no cookies on non-login endpoints
#[tokio::test]
async fn test_check_admin_relays_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/check-admin"))
        .and(header_eq("x-site-database", "acme_db"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_raw(r#"{"hasAdmin":true}"#, "application/json")
                .append_header("set-cookie", "tracking=1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::builder()
        .uri("/api/auth/check-admin")
        .header(header::HOST, "acme.com")
        .header("x-site-database", "acme_db")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(!response.headers().contains_key(header::SET_COOKIE));
    assert_eq!(text_body(response).await, r#"{"hasAdmin":true}"#);
}

#[tokio::test]
async fn test_create_admin_forwards_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/create-admin"))
        .and(header_eq("x-site-database", "acme_db"))
        .and(body_json(json!({"email": "root@acme.com", "password": "longpassword"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "admin-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(post_json(
            "/api/auth/create-admin",
            Some("acme_db"),
            r#"{"email":"root@acme.com","password":"longpassword"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_str(&text_body(response).await).unwrap();
    assert_eq!(body, json!({"id": "admin-1"}));
}

/// Non-JSON bodies are rejected before any backend call
#[tokio::test]
async fn test_non_json_body_is_rejected_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(post_json("/api/auth/create-admin", Some("acme_db"), "email=root"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Session check carries the caller's session cookie to the backend
#[tokio::test]
async fn test_session_check_forwards_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header_eq("cookie", "auth-token=tok-7"))
        .and(header_eq("x-site-database", "acme_db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u7"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::builder()
        .uri("/api/auth/me")
        .header(header::HOST, "acme.com")
        .header("x-site-database", "acme_db")
        .header(header::COOKIE, "lang=en; auth-token=tok-7")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&text_body(response).await).unwrap();
    assert_eq!(body, json!({"id": "u7"}));
}

#[tokio::test]
async fn test_post_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/first-post"))
        .and(header_eq("x-site-database", "acme_db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"slug": "first-post"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::builder()
        .uri("/api/posts/first-post")
        .header(header::HOST, "acme.com")
        .header("x-site-database", "acme_db")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_post_lookup_rejects_dot_segments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let request = Request::builder()
        .uri("/api/posts/..")
        .header(header::HOST, "acme.com")
        .body(Body::empty())
        .unwrap();
    let response = app(&server.uri()).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Unreachable backend becomes a clean 502 without internal detail
#[tokio::test]
async fn test_unreachable_backend_is_clean_bad_gateway() {
    let response = app("http://127.0.0.1:9")
        .oneshot(post_json("/api/auth/login", None, r#"{"email":"x"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = text_body(response).await;
    assert!(!body.contains("127.0.0.1"));
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"error": "backend unavailable"}));
}

/// With the header untrusted, the Host-resolved tenant decides the partition
#[tokio::test]
async fn test_untrusted_header_uses_resolved_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/check-admin"))
        .and(header_eq("x-site-database", "acme_db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hasAdmin": false})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server.uri());
    config.proxy.trust_database_header = false;
    let app = Gateway::new(config).unwrap().router();

    let request = Request::builder()
        .uri("/api/auth/check-admin")
        .header(header::HOST, "acme.com")
        .header("x-site-database", "globex_db")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
