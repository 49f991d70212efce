use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator embedded in every token. A refresh token must never be
/// accepted where an access token is expected, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,           // account id
    pub token_type: TokenType,
    pub jti: String,        // unique id for blacklist lookups
    pub iat: i64,           // issued at
    pub exp: i64,           // expiration time
}

impl Claims {
    pub fn new(account_id: i64, token_type: TokenType, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();

        Self {
            sub: account_id,
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}
