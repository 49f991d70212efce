use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::account::Account;
use crate::models::audit::AuditEvent;

/// Outbound email collaborator. Fire-and-forget, best-effort; the core
/// never waits for delivery confirmation. Template rendering and transport
/// live behind this seam.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, email: &str, code: &str) -> Result<(), String>;
    async fn send_password_reset(&self, email: &str, code: &str) -> Result<(), String>;
    async fn send_login_notification(
        &self,
        email: &str,
        at: i64,
        ip: Option<&str>,
        device: Option<&str>,
    ) -> Result<(), String>;
}

/// Default notifier: logs instead of sending. Stands in until a real mailer
/// is wired up.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_verification(&self, email: &str, code: &str) -> Result<(), String> {
        info!(email = %email, code = %code, "verification email");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, code: &str) -> Result<(), String> {
        info!(email = %email, code = %code, "password reset email");
        Ok(())
    }

    async fn send_login_notification(
        &self,
        email: &str,
        at: i64,
        ip: Option<&str>,
        device: Option<&str>,
    ) -> Result<(), String> {
        info!(email = %email, at, ip = ?ip, device = ?device, "login notification email");
        Ok(())
    }
}

#[derive(Debug)]
pub struct VerificationEmail {
    pub to: String,
    pub code: String,
}

#[derive(Debug)]
pub struct PasswordResetEmail {
    pub to: String,
    pub code: String,
}

#[derive(Debug)]
pub struct LoginNotification {
    pub to: String,
    pub at: i64,
    pub ip: Option<String>,
    pub device: Option<String>,
}

/// Deferred account writes. The statements behind these are atomic, so
/// concurrent workers and request handlers cannot lose updates.
#[derive(Debug)]
pub enum AccountMutation {
    RecordFailedLogin { account_id: i64 },
    LockAccount { account_id: i64, until: i64 },
    ResetFailedAttempts { account_id: i64 },
    UpdateLastLogin { account_id: i64, ip: Option<String>, at: i64 },
    InvalidateResetCode { account_id: i64 },
}

/// Asynchronous side-effect fan-out: five independent bounded queues, each
/// drained by one dedicated worker. The request path only enqueues and
/// never blocks on delivery or persistence.
///
/// Backpressure policy: drop-newest. `try_send` on a full queue drops the
/// event with a warning; request latency is never coupled to side-effect
/// throughput. Within one queue processing is FIFO; there is no ordering
/// across queues. Worker failures are logged and dropped, never retried.
#[derive(Clone)]
pub struct EventDispatcher {
    verification_tx: mpsc::Sender<VerificationEmail>,
    reset_tx: mpsc::Sender<PasswordResetEmail>,
    notification_tx: mpsc::Sender<LoginNotification>,
    audit_tx: mpsc::Sender<AuditEvent>,
    account_tx: mpsc::Sender<AccountMutation>,
}

impl EventDispatcher {
    pub fn spawn(
        pool: SqlitePool,
        notifier: Arc<dyn Notifier>,
        capacity: usize,
        lockout_threshold: i64,
        lockout_secs: i64,
    ) -> Self {
        let (verification_tx, mut verification_rx) = mpsc::channel::<VerificationEmail>(capacity);
        let (reset_tx, mut reset_rx) = mpsc::channel::<PasswordResetEmail>(capacity);
        let (notification_tx, mut notification_rx) = mpsc::channel::<LoginNotification>(capacity);
        let (audit_tx, mut audit_rx) = mpsc::channel::<AuditEvent>(capacity);
        let (account_tx, mut account_rx) = mpsc::channel::<AccountMutation>(capacity);

        let mailer = notifier.clone();
        tokio::spawn(async move {
            while let Some(job) = verification_rx.recv().await {
                if let Err(e) = mailer.send_verification(&job.to, &job.code).await {
                    warn!(error = %e, "verification email failed; dropping");
                }
            }
        });

        let mailer = notifier.clone();
        tokio::spawn(async move {
            while let Some(job) = reset_rx.recv().await {
                if let Err(e) = mailer.send_password_reset(&job.to, &job.code).await {
                    warn!(error = %e, "password reset email failed; dropping");
                }
            }
        });

        let mailer = notifier;
        tokio::spawn(async move {
            while let Some(job) = notification_rx.recv().await {
                if let Err(e) = mailer
                    .send_login_notification(&job.to, job.at, job.ip.as_deref(), job.device.as_deref())
                    .await
                {
                    warn!(error = %e, "login notification failed; dropping");
                }
            }
        });

        let audit_pool = pool.clone();
        tokio::spawn(async move {
            while let Some(event) = audit_rx.recv().await {
                if let Err(e) = event.insert(&audit_pool).await {
                    warn!(error = %e, action = %event.action, "audit write failed; dropping");
                }
            }
        });

        tokio::spawn(async move {
            while let Some(mutation) = account_rx.recv().await {
                if let Err(e) =
                    apply_mutation(&pool, &mutation, lockout_threshold, lockout_secs).await
                {
                    warn!(error = %e, ?mutation, "account mutation failed; dropping");
                }
            }
        });

        Self {
            verification_tx,
            reset_tx,
            notification_tx,
            audit_tx,
            account_tx,
        }
    }

    pub fn enqueue_verification_email(&self, job: VerificationEmail) {
        push(&self.verification_tx, job, "verification_email");
    }

    pub fn enqueue_reset_email(&self, job: PasswordResetEmail) {
        push(&self.reset_tx, job, "password_reset_email");
    }

    pub fn enqueue_login_notification(&self, job: LoginNotification) {
        push(&self.notification_tx, job, "login_notification");
    }

    pub fn enqueue_audit(&self, event: AuditEvent) {
        push(&self.audit_tx, event, "audit");
    }

    pub fn enqueue_account_mutation(&self, mutation: AccountMutation) {
        push(&self.account_tx, mutation, "account_mutation");
    }
}

fn push<T>(tx: &mpsc::Sender<T>, job: T, queue: &'static str) {
    if tx.try_send(job).is_err() {
        warn!(queue, "event queue full or closed; dropping event");
    }
}

async fn apply_mutation(
    pool: &SqlitePool,
    mutation: &AccountMutation,
    lockout_threshold: i64,
    lockout_secs: i64,
) -> Result<(), sqlx::Error> {
    match mutation {
        AccountMutation::RecordFailedLogin { account_id } => {
            let lock_until = chrono::Utc::now().timestamp() + lockout_secs;
            Account::record_failed_login(pool, *account_id, lockout_threshold, lock_until).await
        }
        AccountMutation::LockAccount { account_id, until } => {
            Account::lock(pool, *account_id, *until).await
        }
        AccountMutation::ResetFailedAttempts { account_id } => {
            Account::reset_failed_attempts(pool, *account_id).await
        }
        AccountMutation::UpdateLastLogin { account_id, ip, at } => {
            Account::touch_last_login(pool, *account_id, ip.as_deref(), *at).await
        }
        AccountMutation::InvalidateResetCode { account_id } => {
            Account::clear_reset_code(pool, *account_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{insert_test_account, setup_test_db, settle};
    use chrono::Utc;

    fn test_dispatcher(pool: SqlitePool) -> EventDispatcher {
        EventDispatcher::spawn(pool, Arc::new(TracingNotifier), 16, 5, 1800)
    }

    #[tokio::test]
    async fn test_audit_events_are_persisted_in_order() {
        let pool = setup_test_db().await;
        let dispatcher = test_dispatcher(pool.clone());

        dispatcher.enqueue_audit(AuditEvent::new(None, "first", true));
        dispatcher.enqueue_audit(AuditEvent::new(None, "second", false));
        settle().await;

        let actions: Vec<String> =
            sqlx::query_scalar("SELECT action FROM audit_log ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(actions, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_login_mutations_accumulate_and_lock() {
        let pool = setup_test_db().await;
        let account_id = insert_test_account(&pool, "e1@example.com", "e1").await;
        let dispatcher = test_dispatcher(pool.clone());

        for _ in 0..5 {
            dispatcher.enqueue_account_mutation(AccountMutation::RecordFailedLogin { account_id });
        }
        settle().await;

        let account = Account::find_by_id(&pool, account_id).await.unwrap().unwrap();
        assert_eq!(account.failed_attempts, 5);
        assert!(account.locked_until.unwrap() > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_reset_clears_counter_and_lock() {
        let pool = setup_test_db().await;
        let account_id = insert_test_account(&pool, "e2@example.com", "e2").await;
        let dispatcher = test_dispatcher(pool.clone());

        for _ in 0..5 {
            dispatcher.enqueue_account_mutation(AccountMutation::RecordFailedLogin { account_id });
        }
        dispatcher.enqueue_account_mutation(AccountMutation::ResetFailedAttempts { account_id });
        settle().await;

        let account = Account::find_by_id(&pool, account_id).await.unwrap().unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_last_login_update() {
        let pool = setup_test_db().await;
        let account_id = insert_test_account(&pool, "e3@example.com", "e3").await;
        let dispatcher = test_dispatcher(pool.clone());

        let at = Utc::now().timestamp();
        dispatcher.enqueue_account_mutation(AccountMutation::UpdateLastLogin {
            account_id,
            ip: Some("10.0.0.1".to_string()),
            at,
        });
        settle().await;

        let account = Account::find_by_id(&pool, account_id).await.unwrap().unwrap();
        assert_eq!(account.last_login_at, Some(at));
        assert_eq!(account.last_login_ip.as_deref(), Some("10.0.0.1"));
    }
}
