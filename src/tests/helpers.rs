use axum::{
    Router,
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tower::ServiceExt;
use tracing::{Level, info};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::AppConfig;
use crate::services::rate_limiter::RateLimitConfig;
use crate::{build_state, create_router};

static INIT: Once = Once::new();

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_level(true)
            .with_max_level(Level::ERROR)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

/// Fresh in-memory database. A single connection keeps every query -- and
/// the background workers -- on the same memory store.
pub async fn setup_test_db() -> SqlitePool {
    init_tracing();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Config for flow tests: generous auth rate limits so only the dedicated
/// abuse tests ever trip the gate.
pub fn test_config() -> AppConfig {
    AppConfig {
        rate_limits: crate::services::rate_limiter::RateLimitTable {
            auth: RateLimitConfig {
                max_requests: 1000,
                window_secs: 900,
                block_secs: 1800,
            },
            ..AppConfig::default().rate_limits
        },
        ..AppConfig::default()
    }
}

pub fn create_test_app(pool: SqlitePool) -> Router {
    create_test_app_with_config(pool, test_config())
}

pub fn create_test_app_with_config(pool: SqlitePool, config: AppConfig) -> Router {
    let state = build_state(pool, config);
    create_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 7777))))
}

/// Give the side-effect workers a moment to drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

pub async fn test_request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: Option<HeaderMap>,
) -> (StatusCode, String, HeaderMap) {
    info!(method = %method, uri = %uri, "Making test request");

    let body = if let Some(json) = body {
        Body::from(serde_json::to_string(&json).unwrap())
    } else {
        Body::empty()
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    if let Some(custom_headers) = headers {
        for (key, value) in custom_headers.iter() {
            request = request.header(key, value);
        }
    }

    let request = request.body(body).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();

    (status, body, headers)
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        format!("Bearer {token}").parse().unwrap(),
    );
    headers
}

/// Insert a bare account row for service-level tests. The password hash is
/// not a real bcrypt digest; tests that need password checks go through
/// `/register`.
pub async fn insert_test_account(pool: &SqlitePool, email: &str, username: &str) -> i64 {
    let result = sqlx::query(
        "INSERT INTO accounts (email, username, password_hash, email_verified, created_at) \
         VALUES (?1, ?2, 'x', 1, strftime('%s','now'))",
    )
    .bind(email)
    .bind(username)
    .execute(pool)
    .await
    .unwrap();

    result.last_insert_rowid()
}

/// Flip the verified flag directly; the verify-email endpoint has its own
/// dedicated test.
pub async fn mark_verified(pool: &SqlitePool, email: &str) {
    sqlx::query("UPDATE accounts SET email_verified = 1 WHERE email = ?1")
        .bind(email)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn verification_code(pool: &SqlitePool, email: &str) -> String {
    sqlx::query_scalar("SELECT verification_code FROM accounts WHERE email = ?1")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn reset_code(pool: &SqlitePool, email: &str) -> Option<String> {
    sqlx::query_scalar("SELECT reset_code FROM accounts WHERE email = ?1")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Register a user through the API and return the parsed response body.
pub async fn register_user(app: Router, username: &str, email: &str, password: &str) -> Value {
    let (status, body, _) = test_request(
        app,
        "POST",
        "/register",
        Some(serde_json::json!({
            "username": username,
            "email": email,
            "password": password,
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    serde_json::from_str(&body).unwrap()
}

/// Register, verify and log in; returns the login `data` object.
pub async fn register_and_login(
    app: Router,
    pool: &SqlitePool,
    username: &str,
    email: &str,
    password: &str,
) -> Value {
    register_user(app.clone(), username, email, password).await;
    mark_verified(pool, email).await;

    let (status, body, _) = test_request(
        app,
        "POST",
        "/login",
        Some(serde_json::json!({ "email": email, "password": password })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let response: Value = serde_json::from_str(&body).unwrap();
    response["data"].clone()
}
