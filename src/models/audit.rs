use chrono::Utc;
use sqlx::SqlitePool;

/// One append-only audit row. Rows are never mutated after insert and are
/// pruned by age by the maintenance task.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub account_id: Option<i64>,
    pub action: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub details: Option<String>,
}

impl AuditEvent {
    pub fn new(account_id: Option<i64>, action: &str, success: bool) -> Self {
        Self {
            account_id,
            action: action.to_string(),
            ip: None,
            user_agent: None,
            success,
            details: None,
        }
    }

    pub fn with_request(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_log (account_id, action, ip, user_agent, success, details, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(self.account_id)
        .bind(&self.action)
        .bind(&self.ip)
        .bind(&self.user_agent)
        .bind(self.success)
        .bind(&self.details)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Delete rows older than the cutoff. Returns how many were removed.
    pub async fn prune_before(pool: &SqlitePool, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}
