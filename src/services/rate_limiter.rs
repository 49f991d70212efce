use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::ApiError;
use crate::models::rate_limit::RateLimitRecord;

/// Endpoint classes the limiter distinguishes. The identifier a rule is
/// scoped to depends on the class, not on the individual route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Login, register, password and verification endpoints.
    Auth,
    /// Guest session bootstrap.
    GuestSession,
    /// In-game actions from authenticated players.
    Gameplay,
    /// Everything else.
    Default,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::GuestSession => "guest_session",
            EndpointClass::Gameplay => "gameplay",
            EndpointClass::Default => "default",
        }
    }
}

/// Limits for one endpoint class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: i64,
    /// Window duration in seconds.
    pub window_secs: i64,
    /// How long a key stays blocked after exceeding the limit, in seconds.
    pub block_secs: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitTable {
    pub auth: RateLimitConfig,
    pub guest_session: RateLimitConfig,
    pub gameplay: RateLimitConfig,
    pub default: RateLimitConfig,
}

impl RateLimitTable {
    pub fn for_class(&self, class: EndpointClass) -> &RateLimitConfig {
        match class {
            EndpointClass::Auth => &self.auth,
            EndpointClass::GuestSession => &self.guest_session,
            EndpointClass::Gameplay => &self.gameplay,
            EndpointClass::Default => &self.default,
        }
    }
}

/// Outcome of one limiter check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    /// When denied, seconds until the block lifts.
    pub retry_after_secs: Option<i64>,
}

/// Fixed-window request gate with escalating lockout, keyed by
/// `(identifier, endpoint class)`. Counters live in the shared database, so
/// the gate holds across instances. The window resets wholesale at its
/// boundary; a block, once set, outlives any number of window resets.
#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
    table: RateLimitTable,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, table: RateLimitTable) -> Self {
        Self { pool, table }
    }

    /// Record one request against the key and decide whether it may pass.
    pub async fn is_allowed(
        &self,
        identifier: &str,
        class: EndpointClass,
    ) -> Result<RateLimitDecision, sqlx::Error> {
        let config = self.table.for_class(class);
        let now = Utc::now().timestamp();

        let record = RateLimitRecord::hit(
            &self.pool,
            identifier,
            class.as_str(),
            now,
            config.window_secs,
            config.max_requests,
            config.block_secs,
        )
        .await?;

        match record.blocked_until {
            Some(blocked_until) if blocked_until > now => Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: Some(blocked_until - now),
            }),
            _ => Ok(RateLimitDecision {
                allowed: true,
                remaining: (config.max_requests - record.request_count).max(0),
                retry_after_secs: None,
            }),
        }
    }

    /// Gate used by handlers: deny with `TooManyRequests` carrying the
    /// retry hint, allow otherwise.
    pub async fn check(&self, identifier: &str, class: EndpointClass) -> Result<(), ApiError> {
        let decision = self.is_allowed(identifier, class).await?;

        if !decision.allowed {
            warn!(
                identifier = %identifier,
                class = class.as_str(),
                retry_after_secs = decision.retry_after_secs.unwrap_or(0),
                "rate limit exceeded"
            );
            return Err(ApiError::TooManyRequests {
                retry_after_secs: decision.retry_after_secs.unwrap_or(0),
            });
        }

        Ok(())
    }
}

/// Authentication endpoints key on ip plus the submitted email when one is
/// present.
pub fn auth_identifier(ip: &str, email: Option<&str>) -> String {
    match email {
        Some(email) => format!("{ip}:{email}"),
        None => ip.to_string(),
    }
}

/// Guest-session endpoints key on the device id, falling back to ip.
pub fn guest_identifier(device_id: Option<&str>, ip: &str) -> String {
    device_id.unwrap_or(ip).to_string()
}

/// Gameplay endpoints key on the authenticated subject, falling back to ip.
pub fn gameplay_identifier(account_id: Option<i64>, ip: &str) -> String {
    match account_id {
        Some(id) => id.to_string(),
        None => ip.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::setup_test_db;
    use std::time::Duration;

    fn test_table(max_requests: i64, window_secs: i64, block_secs: i64) -> RateLimitTable {
        let config = RateLimitConfig {
            max_requests,
            window_secs,
            block_secs,
        };
        RateLimitTable {
            auth: config.clone(),
            guest_session: config.clone(),
            gameplay: config.clone(),
            default: config,
        }
    }

    #[tokio::test]
    async fn test_exactly_max_requests_pass() {
        let pool = setup_test_db().await;
        let limiter = RateLimiter::new(pool, test_table(5, 900, 1800));

        for i in 0..5 {
            let decision = limiter.is_allowed("1.2.3.4", EndpointClass::Auth).await.unwrap();
            assert!(decision.allowed, "request {} should pass", i + 1);
        }

        let denied = limiter.is_allowed("1.2.3.4", EndpointClass::Auth).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let pool = setup_test_db().await;
        let limiter = RateLimiter::new(pool, test_table(1, 900, 1800));

        assert!(limiter.is_allowed("a", EndpointClass::Auth).await.unwrap().allowed);
        assert!(!limiter.is_allowed("a", EndpointClass::Auth).await.unwrap().allowed);

        // Different identifier, same class.
        assert!(limiter.is_allowed("b", EndpointClass::Auth).await.unwrap().allowed);
        // Same identifier, different class.
        assert!(limiter.is_allowed("a", EndpointClass::Default).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_reset_allows_again() {
        let pool = setup_test_db().await;
        let limiter = RateLimiter::new(pool, test_table(2, 1, 3600));

        assert!(limiter.is_allowed("x", EndpointClass::Default).await.unwrap().allowed);
        assert!(limiter.is_allowed("x", EndpointClass::Default).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        // Window elapsed without the key ever being blocked: fresh counter.
        let decision = limiter.is_allowed("x", EndpointClass::Default).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_block_outlives_window_reset() {
        let pool = setup_test_db().await;
        let limiter = RateLimiter::new(pool, test_table(1, 1, 3600));

        assert!(limiter.is_allowed("y", EndpointClass::Auth).await.unwrap().allowed);
        // Over the limit: escalates to blocked.
        assert!(!limiter.is_allowed("y", EndpointClass::Auth).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        // The window has long elapsed but the block still holds.
        let decision = limiter.is_allowed("y", EndpointClass::Auth).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs.unwrap() > 3000);
    }

    #[test]
    fn test_identifier_resolution() {
        assert_eq!(auth_identifier("1.1.1.1", Some("a@b.c")), "1.1.1.1:a@b.c");
        assert_eq!(auth_identifier("1.1.1.1", None), "1.1.1.1");
        assert_eq!(guest_identifier(Some("device-9"), "1.1.1.1"), "device-9");
        assert_eq!(guest_identifier(None, "1.1.1.1"), "1.1.1.1");
        assert_eq!(gameplay_identifier(Some(77), "1.1.1.1"), "77");
        assert_eq!(gameplay_identifier(None, "1.1.1.1"), "1.1.1.1");
    }
}
