use chrono::Utc;

use crate::error::ApiError;
use crate::models::account::Account;

/// Account lockout policy. The counter and lock columns live on the account
/// row; this guard owns the decisions around them.
///
/// The locked check runs before any password comparison, so a locked
/// account is rejected even when the submitted password is correct -- and a
/// rejected-while-locked attempt never consumes a further increment.
#[derive(Debug, Clone)]
pub struct LockoutGuard {
    threshold: i64,
    lockout_secs: i64,
}

impl LockoutGuard {
    pub fn new(threshold: i64, lockout_secs: i64) -> Self {
        Self {
            threshold,
            lockout_secs,
        }
    }

    /// Reject the attempt while the lock window is still open. An elapsed
    /// lock is treated as Normal; the stale `locked_until` is cleared by the
    /// counter reset on the next successful login.
    pub fn ensure_not_locked(&self, account: &Account) -> Result<(), ApiError> {
        if let Some(locked_until) = account.locked_until {
            if locked_until > Utc::now().timestamp() {
                return Err(ApiError::Unauthorized("Account locked"));
            }
        }

        Ok(())
    }

    /// Whether one more failure would push the account over the threshold.
    pub fn should_lock(&self, account: &Account) -> bool {
        account.failed_attempts + 1 >= self.threshold
    }

    /// The lock expiry for a lock decided now.
    pub fn lock_until(&self) -> i64 {
        Utc::now().timestamp() + self.lockout_secs
    }
}
