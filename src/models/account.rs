use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

/// Full account row.
///
/// Contains the password hash -- never serialize this directly to API
/// responses. Use [`AccountSummary`] for external-facing output.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub failed_attempts: i64,
    pub locked_until: Option<i64>,
    pub last_login_at: Option<i64>,
    pub last_login_ip: Option<String>,
    pub verification_code: Option<String>,
    pub verification_expires: Option<i64>,
    pub reset_code: Option<String>,
    pub reset_expires: Option<i64>,
    pub created_at: i64,
}

/// Safe account representation for API responses (no password hash).
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            role: account.role.clone(),
            email_verified: account.email_verified,
        }
    }
}

const COLUMNS: &str = "id, email, username, password_hash, role, is_active, email_verified, \
     failed_attempts, locked_until, last_login_at, last_login_ip, \
     verification_code, verification_expires, reset_code, reset_expires, created_at";

impl Account {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(
        pool: &SqlitePool,
        email: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE email = ?1"
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE username = ?1"
        ))
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_verification_code(
        pool: &SqlitePool,
        code: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE verification_code = ?1"
        ))
        .bind(code)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_reset_code(
        pool: &SqlitePool,
        code: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE reset_code = ?1"
        ))
        .bind(code)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        email: &str,
        username: &str,
        password_hash: &str,
        verification_code: Option<&str>,
        verification_expires: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO accounts \
                 (email, username, password_hash, verification_code, verification_expires, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .bind(verification_code)
        .bind(verification_expires)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Atomically bump the failed-attempt counter, locking the account in
    /// the same statement once the threshold is reached. Concurrent
    /// increments cannot be lost and cannot both skip the lock.
    pub async fn record_failed_login(
        pool: &SqlitePool,
        id: i64,
        threshold: i64,
        lock_until: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET \
                 failed_attempts = failed_attempts + 1, \
                 locked_until = CASE \
                     WHEN failed_attempts + 1 >= ?2 THEN ?3 \
                     ELSE locked_until \
                 END \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(threshold)
        .bind(lock_until)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Lock the account until the given time, keeping any later lock already
    /// in place.
    pub async fn lock(pool: &SqlitePool, id: i64, until: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET locked_until = MAX(COALESCE(locked_until, 0), ?2) WHERE id = ?1",
        )
        .bind(id)
        .bind(until)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn reset_failed_attempts(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET failed_attempts = 0, locked_until = NULL WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn touch_last_login(
        pool: &SqlitePool,
        id: i64,
        ip: Option<&str>,
        at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET last_login_at = ?2, last_login_ip = ?3 WHERE id = ?1")
            .bind(id)
            .bind(at)
            .bind(ip)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn mark_verified(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET email_verified = 1, \
                 verification_code = NULL, verification_expires = NULL \
             WHERE id = ?1",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn set_verification_code(
        pool: &SqlitePool,
        id: i64,
        code: &str,
        expires: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET verification_code = ?2, verification_expires = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(code)
        .bind(expires)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn set_reset_code(
        pool: &SqlitePool,
        id: i64,
        code: &str,
        expires: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET reset_code = ?2, reset_expires = ?3 WHERE id = ?1")
            .bind(id)
            .bind(code)
            .bind(expires)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn clear_reset_code(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET reset_code = NULL, reset_expires = NULL WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn update_password(
        pool: &SqlitePool,
        id: i64,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET password_hash = ?2 WHERE id = ?1")
            .bind(id)
            .bind(password_hash)
            .execute(pool)
            .await?;

        Ok(())
    }
}
