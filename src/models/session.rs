use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Per-device session row. Holds only the SHA-256 hash of the current
/// refresh token -- the raw token is never persisted.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub account_id: i64,
    pub token_hash: String,
    pub device_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub last_used_at: i64,
    pub expires_at: i64,
    pub is_active: bool,
}

const COLUMNS: &str =
    "id, account_id, token_hash, device_id, ip, user_agent, created_at, last_used_at, \
     expires_at, is_active";

impl Session {
    pub async fn create(
        pool: &SqlitePool,
        account_id: i64,
        token_hash: &str,
        device_id: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        expires_at: i64,
    ) -> Result<String, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO sessions \
                 (id, account_id, token_hash, device_id, ip, user_agent, \
                  created_at, last_used_at, expires_at, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, 1)",
        )
        .bind(&id)
        .bind(account_id)
        .bind(token_hash)
        .bind(device_id)
        .bind(ip)
        .bind(user_agent)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(id)
    }

    pub async fn find_active_by_hash(
        pool: &SqlitePool,
        account_id: i64,
        token_hash: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {COLUMNS} FROM sessions \
             WHERE account_id = ?1 AND token_hash = ?2 AND is_active = 1 AND expires_at > ?3"
        ))
        .bind(account_id)
        .bind(token_hash)
        .bind(Utc::now().timestamp())
        .fetch_optional(pool)
        .await
    }

    /// Replace the stored token hash. The previous refresh token stops
    /// matching any session row from this point on.
    pub async fn rotate(
        pool: &SqlitePool,
        id: &str,
        new_token_hash: &str,
        expires_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sessions SET token_hash = ?2, last_used_at = ?3, expires_at = ?4 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(new_token_hash)
        .bind(Utc::now().timestamp())
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Deactivate one session. A no-op when the session is already inactive
    /// or unknown.
    pub async fn deactivate(
        pool: &SqlitePool,
        id: &str,
        account_id: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ?1 AND account_id = ?2")
            .bind(id)
            .bind(account_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn deactivate_by_hash(
        pool: &SqlitePool,
        account_id: i64,
        token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE account_id = ?1 AND token_hash = ?2")
            .bind(account_id)
            .bind(token_hash)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn deactivate_all(pool: &SqlitePool, account_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE account_id = ?1")
            .bind(account_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn deactivate_all_except(
        pool: &SqlitePool,
        account_id: i64,
        except_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET is_active = 0 WHERE account_id = ?1 AND id <> ?2")
            .bind(account_id)
            .bind(except_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
