use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::ApiError;
use crate::models::session::Session;

/// One-way hash for refresh tokens at rest. Sessions never store the raw
/// token, only this digest.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Creates, rotates and revokes per-device sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    pool: SqlitePool,
    refresh_ttl_secs: i64,
}

impl SessionRegistry {
    pub fn new(pool: SqlitePool, refresh_ttl_secs: i64) -> Self {
        Self {
            pool,
            refresh_ttl_secs,
        }
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn create(
        &self,
        account_id: i64,
        refresh_token: &str,
        device_id: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<String, ApiError> {
        let expires_at = Utc::now().timestamp() + self.refresh_ttl_secs;

        let id = Session::create(
            &self.pool,
            account_id,
            &hash_token(refresh_token),
            device_id,
            ip,
            user_agent,
            expires_at,
        )
        .await?;

        Ok(id)
    }

    /// Look up the active, unexpired session matching this refresh token.
    /// A token whose hash no longer matches any row -- because it was
    /// rotated away or the session was revoked -- fails here, which is what
    /// makes rotation single-use and reuse detectable.
    pub async fn find_active(
        &self,
        account_id: i64,
        refresh_token: &str,
    ) -> Result<Session, ApiError> {
        Session::find_active_by_hash(&self.pool, account_id, &hash_token(refresh_token))
            .await?
            .ok_or(ApiError::Unauthorized("Session not found or expired"))
    }

    /// Swap in the hash of the new refresh token, invalidating the previous
    /// one.
    #[instrument(skip(self, new_refresh_token))]
    pub async fn rotate(&self, session_id: &str, new_refresh_token: &str) -> Result<(), ApiError> {
        let expires_at = Utc::now().timestamp() + self.refresh_ttl_secs;

        Session::rotate(
            &self.pool,
            session_id,
            &hash_token(new_refresh_token),
            expires_at,
        )
        .await?;

        Ok(())
    }

    /// Idempotent: deactivating an already-inactive or unknown session is a
    /// no-op success.
    pub async fn deactivate(&self, session_id: &str, account_id: i64) -> Result<(), ApiError> {
        Session::deactivate(&self.pool, session_id, account_id).await?;
        Ok(())
    }

    pub async fn deactivate_by_token(
        &self,
        account_id: i64,
        refresh_token: &str,
    ) -> Result<(), ApiError> {
        Session::deactivate_by_hash(&self.pool, account_id, &hash_token(refresh_token)).await?;
        Ok(())
    }

    pub async fn deactivate_all(&self, account_id: i64) -> Result<(), ApiError> {
        Session::deactivate_all(&self.pool, account_id).await?;
        Ok(())
    }

    pub async fn deactivate_all_except(
        &self,
        account_id: i64,
        except_session_id: &str,
    ) -> Result<(), ApiError> {
        Session::deactivate_all_except(&self.pool, account_id, except_session_id).await?;
        Ok(())
    }
}
