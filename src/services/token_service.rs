use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sqlx::SqlitePool;
use tracing::{error, instrument};

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::claims::{Claims, TokenPair, TokenType};

/// Issues, verifies and revokes signed token pairs. Access and refresh
/// tokens are signed with distinct secrets, so one kind can never verify as
/// the other even before the `token_type` claim is checked.
#[derive(Clone)]
pub struct TokenService {
    pool: SqlitePool,
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Self {
        Self {
            pool,
            access_enc: EncodingKey::from_secret(config.access_token_secret.as_bytes()),
            access_dec: DecodingKey::from_secret(config.access_token_secret.as_bytes()),
            refresh_enc: EncodingKey::from_secret(config.refresh_token_secret.as_bytes()),
            refresh_dec: DecodingKey::from_secret(config.refresh_token_secret.as_bytes()),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
        }
    }

    /// Generate a fresh access/refresh pair for an account.
    #[instrument(skip(self))]
    pub fn issue_pair(&self, account_id: i64) -> Result<TokenPair, ApiError> {
        let access_claims = Claims::new(account_id, TokenType::Access, self.access_ttl_secs);
        let refresh_claims = Claims::new(account_id, TokenType::Refresh, self.refresh_ttl_secs);

        let access_token = self.sign(&access_claims)?;
        let refresh_token = self.sign(&refresh_claims)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl_secs,
        })
    }

    /// Validate a token of the expected type and return its claims.
    /// Fails with `Unauthorized` on a bad signature, a type mismatch,
    /// expiry, or a blacklisted JTI.
    #[instrument(skip(self, token))]
    pub async fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, ApiError> {
        let key = match expected {
            TokenType::Access => &self.access_dec,
            TokenType::Refresh => &self.refresh_dec,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token"))?;

        if claims.token_type != expected {
            return Err(ApiError::Unauthorized("Invalid or expired token"));
        }

        if self.is_blacklisted(&claims.jti).await? {
            return Err(ApiError::Unauthorized("Token has been revoked"));
        }

        Ok(claims)
    }

    /// Revoke a token by persisting its JTI with the original expiry, so the
    /// entry can be garbage-collected once the token would have expired
    /// anyway.
    #[instrument(skip(self, token))]
    pub async fn blacklist(&self, token: &str, token_type: TokenType) -> Result<(), ApiError> {
        let key = match token_type {
            TokenType::Access => &self.access_dec,
            TokenType::Refresh => &self.refresh_dec,
        };

        // The token has already been accepted by this point; an expired one
        // is not worth revoking, so expiry validation stays off here.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token"))?;

        sqlx::query("INSERT OR IGNORE INTO token_blacklist (jti, expires_at) VALUES (?1, ?2)")
            .bind(&claims.jti)
            .bind(claims.exp)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Pull the token out of an `Authorization: Bearer ...` header.
    pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
        let header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Missing authorization header"))?;

        header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized("Invalid authorization scheme"))
    }

    /// Drop blacklist entries whose tokens have expired naturally.
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at <= ?1")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, ApiError> {
        let row = sqlx::query("SELECT 1 FROM token_blacklist WHERE jti = ?1")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    fn sign(&self, claims: &Claims) -> Result<String, ApiError> {
        let key = match claims.token_type {
            TokenType::Access => &self.access_enc,
            TokenType::Refresh => &self.refresh_enc,
        };

        encode(&Header::default(), claims, key).map_err(|e| {
            error!(error = %e, "failed to sign token");
            ApiError::Internal
        })
    }
}
