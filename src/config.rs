use dotenv::dotenv;
use std::env;

use crate::services::rate_limiter::{RateLimitConfig, RateLimitTable};

/// Process-wide configuration, built once at startup and shared through
/// `AppState`. Every tunable the auth subsystem uses lives here; nothing is
/// hardcoded in the flows themselves.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    /// Access token lifetime in seconds.
    pub access_ttl_secs: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl_secs: i64,
    /// Failed logins before the account locks.
    pub lockout_threshold: i64,
    /// How long a locked account stays locked, in seconds.
    pub lockout_secs: i64,
    pub password_min_len: usize,
    pub require_email_verification: bool,
    pub verification_code_ttl_secs: i64,
    pub reset_code_ttl_secs: i64,
    /// Capacity of each side-effect queue.
    pub event_queue_capacity: usize,
    /// Audit rows older than this are pruned.
    pub audit_retention_secs: i64,
    pub rate_limits: RateLimitTable,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            access_token_secret: "dev-access-secret-change-me".to_string(),
            refresh_token_secret: "dev-refresh-secret-change-me".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 3600,
            lockout_threshold: 5,
            lockout_secs: 30 * 60,
            password_min_len: 8,
            require_email_verification: true,
            verification_code_ttl_secs: 15 * 60,
            reset_code_ttl_secs: 3600,
            event_queue_capacity: 256,
            audit_retention_secs: 90 * 24 * 3600,
            rate_limits: RateLimitTable {
                auth: RateLimitConfig {
                    max_requests: 5,
                    window_secs: 15 * 60,
                    block_secs: 30 * 60,
                },
                guest_session: RateLimitConfig {
                    max_requests: 10,
                    window_secs: 3600,
                    block_secs: 3600,
                },
                gameplay: RateLimitConfig {
                    max_requests: 120,
                    window_secs: 60,
                    block_secs: 5 * 60,
                },
                default: RateLimitConfig {
                    max_requests: 60,
                    window_secs: 60,
                    block_secs: 5 * 60,
                },
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to the dev
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        dotenv().ok();

        let mut config = Self::default();

        if let Ok(secret) = env::var("ACCESS_TOKEN_SECRET") {
            config.access_token_secret = secret;
        }
        if let Ok(secret) = env::var("REFRESH_TOKEN_SECRET") {
            config.refresh_token_secret = secret;
        }
        if let Some(ttl) = env_i64("ACCESS_TOKEN_TTL_SECS") {
            config.access_ttl_secs = ttl;
        }
        if let Some(ttl) = env_i64("REFRESH_TOKEN_TTL_SECS") {
            config.refresh_ttl_secs = ttl;
        }
        if let Some(threshold) = env_i64("LOCKOUT_THRESHOLD") {
            config.lockout_threshold = threshold;
        }
        if let Some(secs) = env_i64("LOCKOUT_SECS") {
            config.lockout_secs = secs;
        }
        if let Some(len) = env_i64("PASSWORD_MIN_LEN") {
            config.password_min_len = len as usize;
        }
        if let Ok(value) = env::var("REQUIRE_EMAIL_VERIFICATION") {
            config.require_email_verification =
                matches!(value.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }

        config
    }
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse::<i64>().ok())
}
