use axum::{
    Router,
    routing::{get, post},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod services;
#[cfg(test)]
mod tests;

use config::AppConfig;
use models::audit::AuditEvent;
use services::auth_service::AuthService;
use services::events::{EventDispatcher, TracingNotifier};
use services::lockout::LockoutGuard;
use services::rate_limiter::RateLimiter;
use services::session_service::SessionRegistry;
use services::token_service::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub auth: AuthService,
    pub limiter: RateLimiter,
}

/// Wire the service graph together. Also spawns the side-effect workers.
pub fn build_state(pool: SqlitePool, config: AppConfig) -> AppState {
    let config = Arc::new(config);

    let events = EventDispatcher::spawn(
        pool.clone(),
        Arc::new(TracingNotifier),
        config.event_queue_capacity,
        config.lockout_threshold,
        config.lockout_secs,
    );
    let tokens = TokenService::new(pool.clone(), &config);
    let sessions = SessionRegistry::new(pool.clone(), config.refresh_ttl_secs);
    let lockout = LockoutGuard::new(config.lockout_threshold, config.lockout_secs);
    let limiter = RateLimiter::new(pool.clone(), config.rate_limits.clone());
    let auth = AuthService::new(
        pool.clone(),
        config.clone(),
        tokens.clone(),
        sessions,
        lockout,
        events,
    );

    AppState {
        db: pool,
        config,
        tokens,
        auth,
        limiter,
    }
}

pub fn create_router(state: AppState) -> Router {
    // Create a CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/logout", post(api::auth::logout))
        .route("/logout-all", post(api::auth::logout_all))
        .route("/change-password", post(api::auth::change_password))
        .route("/me", get(api::user::get_current_user))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/register", post(api::auth::register))
        .route("/login", post(api::auth::login))
        .route("/refresh", post(api::auth::refresh))
        .route("/verify-email", post(api::auth::verify_email))
        .route("/resend-verification", post(api::auth::resend_verification))
        .route("/forgot-password", post(api::auth::forgot_password))
        .route("/reset-password", post(api::auth::reset_password))
        .route("/username/check/:username", get(api::user::check_username))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

/// Hourly cleanup of naturally-expired blacklist entries and old audit rows.
fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;

            match state.tokens.purge_expired().await {
                Ok(purged) if purged > 0 => info!(purged, "purged expired blacklist entries"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "blacklist purge failed"),
            }

            let cutoff = Utc::now().timestamp() - state.config.audit_retention_secs;
            match AuditEvent::prune_before(&state.db, cutoff).await {
                Ok(pruned) if pruned > 0 => info!(pruned, "pruned old audit rows"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "audit prune failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    // Initialize database
    let pool = db::create_db_pool().await;

    let state = build_state(pool, config);
    spawn_maintenance(state.clone());

    // Create the router
    let app = create_router(state);

    // run it with hyper
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
