use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::instrument;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::account::{Account, AccountSummary};
use crate::models::audit::AuditEvent;
use crate::models::claims::TokenType;
use crate::services::events::{
    AccountMutation, EventDispatcher, LoginNotification, PasswordResetEmail, VerificationEmail,
};
use crate::services::lockout::LockoutGuard;
use crate::services::session_service::SessionRegistry;
use crate::services::token_service::TokenService;

#[derive(Debug, Serialize)]
pub struct RegisterData {
    pub id: i64,
    pub verification_required: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub session_id: String,
    pub user: AccountSummary,
}

#[derive(Debug, Serialize)]
pub struct RefreshData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub session_id: String,
}

/// Composes credential checks, lockout, tokens, sessions and the async
/// side-effect pipeline into the public auth flows. Side effects (email,
/// audit, deferred counter writes) are only ever enqueued here; the
/// response never waits on them.
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    config: Arc<AppConfig>,
    tokens: TokenService,
    sessions: SessionRegistry,
    lockout: LockoutGuard,
    events: EventDispatcher,
}

impl AuthService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<AppConfig>,
        tokens: TokenService,
        sessions: SessionRegistry,
        lockout: LockoutGuard,
        events: EventDispatcher,
    ) -> Self {
        Self {
            pool,
            config,
            tokens,
            sessions,
            lockout,
            events,
        }
    }

    #[instrument(skip(self, password, ip, user_agent))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RegisterData, ApiError> {
        validate_username(username)?;
        validate_email(email)?;

        // Conflict checks come before any hashing work.
        if Account::find_by_username(&self.pool, username).await?.is_some() {
            return Err(ApiError::Conflict("Username already taken"));
        }
        if Account::find_by_email(&self.pool, email).await?.is_some() {
            return Err(ApiError::Conflict("Email already registered"));
        }

        validate_password(password, self.config.password_min_len)?;

        let password_hash = hash(password, DEFAULT_COST)?;
        let code = one_time_code();
        let expires = Utc::now().timestamp() + self.config.verification_code_ttl_secs;

        let id = Account::create(
            &self.pool,
            email,
            username,
            &password_hash,
            Some(&code),
            Some(expires),
        )
        .await?;

        self.events.enqueue_verification_email(VerificationEmail {
            to: email.to_string(),
            code,
        });
        self.events.enqueue_audit(
            AuditEvent::new(Some(id), "register", true).with_request(ip, user_agent),
        );

        Ok(RegisterData {
            id,
            verification_required: self.config.require_email_verification,
        })
    }

    #[instrument(skip(self, password, ip, user_agent))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_id: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<LoginData, ApiError> {
        let Some(account) = Account::find_by_email(&self.pool, email).await? else {
            self.audit_login_failure(None, "unknown email", ip, user_agent);
            return Err(ApiError::Unauthorized("Invalid email or password"));
        };

        if !account.is_active {
            self.audit_login_failure(Some(account.id), "inactive account", ip, user_agent);
            return Err(ApiError::Unauthorized("Invalid email or password"));
        }

        // Locked accounts are rejected before the password is even compared,
        // and without consuming a further attempt.
        if self.lockout.ensure_not_locked(&account).is_err() {
            self.audit_login_failure(Some(account.id), "account locked", ip, user_agent);
            return Err(ApiError::Unauthorized("Account locked"));
        }

        if !verify(password, &account.password_hash)? {
            self.events
                .enqueue_account_mutation(AccountMutation::RecordFailedLogin {
                    account_id: account.id,
                });
            if self.lockout.should_lock(&account) {
                self.events
                    .enqueue_account_mutation(AccountMutation::LockAccount {
                        account_id: account.id,
                        until: self.lockout.lock_until(),
                    });
            }
            self.audit_login_failure(Some(account.id), "invalid password", ip, user_agent);
            return Err(ApiError::Unauthorized("Invalid email or password"));
        }

        if self.config.require_email_verification && !account.email_verified {
            self.audit_login_failure(Some(account.id), "email not verified", ip, user_agent);
            return Err(ApiError::Unauthorized("Email not verified"));
        }

        let pair = self.tokens.issue_pair(account.id)?;
        let session_id = self
            .sessions
            .create(account.id, &pair.refresh_token, device_id, ip, user_agent)
            .await?;

        let now = Utc::now().timestamp();
        self.events
            .enqueue_account_mutation(AccountMutation::ResetFailedAttempts {
                account_id: account.id,
            });
        self.events
            .enqueue_account_mutation(AccountMutation::UpdateLastLogin {
                account_id: account.id,
                ip: ip.map(str::to_string),
                at: now,
            });
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "login", true).with_request(ip, user_agent),
        );
        self.events.enqueue_login_notification(LoginNotification {
            to: account.email.clone(),
            at: now,
            ip: ip.map(str::to_string),
            device: device_id.or(user_agent).map(str::to_string),
        });

        Ok(LoginData {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            session_id,
            user: AccountSummary::from(&account),
        })
    }

    #[instrument(skip(self, refresh_token, ip, user_agent))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RefreshData, ApiError> {
        let claims = self.tokens.verify(refresh_token, TokenType::Refresh).await?;
        let session = self.sessions.find_active(claims.sub, refresh_token).await?;

        let pair = self.tokens.issue_pair(claims.sub)?;
        self.sessions.rotate(&session.id, &pair.refresh_token).await?;

        self.events.enqueue_audit(
            AuditEvent::new(Some(claims.sub), "refresh", true).with_request(ip, user_agent),
        );

        Ok(RefreshData {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            session_id: session.id,
        })
    }

    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        account: &Account,
        access_token: &str,
        refresh_token: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        if let Some(refresh_token) = refresh_token {
            self.sessions
                .deactivate_by_token(account.id, refresh_token)
                .await?;
        }

        self.tokens.blacklist(access_token, TokenType::Access).await?;
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "logout", true).with_request(ip, user_agent),
        );

        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn logout_all(
        &self,
        account: &Account,
        access_token: &str,
        refresh_token: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        // Keep the session the caller presented, if it still resolves.
        let current = match refresh_token {
            Some(token) => self.sessions.find_active(account.id, token).await.ok(),
            None => None,
        };

        match current {
            Some(session) => {
                self.sessions
                    .deactivate_all_except(account.id, &session.id)
                    .await?;
            }
            None => self.sessions.deactivate_all(account.id).await?,
        }

        self.tokens.blacklist(access_token, TokenType::Access).await?;
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "logout_all", true).with_request(ip, user_agent),
        );

        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn verify_email(
        &self,
        code: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        let account = Account::find_by_verification_code(&self.pool, code)
            .await?
            .ok_or(ApiError::NotFound("Unknown verification code"))?;

        let expired = account
            .verification_expires
            .is_none_or(|expires| expires < Utc::now().timestamp());
        if expired {
            return Err(ApiError::Validation("Verification code expired".to_string()));
        }

        Account::mark_verified(&self.pool, account.id).await?;
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "verify_email", true).with_request(ip, user_agent),
        );

        Ok(())
    }

    /// Success-shaped whether or not the email exists, so the endpoint
    /// cannot be used to probe for accounts.
    #[instrument(skip_all)]
    pub async fn resend_verification(&self, email: &str) -> Result<(), ApiError> {
        let Some(account) = Account::find_by_email(&self.pool, email).await? else {
            return Ok(());
        };
        if account.email_verified {
            return Ok(());
        }

        let code = one_time_code();
        let expires = Utc::now().timestamp() + self.config.verification_code_ttl_secs;
        Account::set_verification_code(&self.pool, account.id, &code, expires).await?;

        self.events.enqueue_verification_email(VerificationEmail {
            to: account.email,
            code,
        });

        Ok(())
    }

    /// Success-shaped whether or not the email exists.
    #[instrument(skip_all)]
    pub async fn forgot_password(
        &self,
        email: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        let Some(account) = Account::find_by_email(&self.pool, email).await? else {
            return Ok(());
        };

        let code = one_time_code();
        let expires = Utc::now().timestamp() + self.config.reset_code_ttl_secs;
        Account::set_reset_code(&self.pool, account.id, &code, expires).await?;

        self.events.enqueue_reset_email(PasswordResetEmail {
            to: account.email,
            code,
        });
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "forgot_password", true)
                .with_request(ip, user_agent),
        );

        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        code: &str,
        new_password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        validate_password(new_password, self.config.password_min_len)?;

        let account = Account::find_by_reset_code(&self.pool, code)
            .await?
            .ok_or(ApiError::NotFound("Unknown reset code"))?;

        let expired = account
            .reset_expires
            .is_none_or(|expires| expires < Utc::now().timestamp());
        if expired {
            return Err(ApiError::Validation("Reset code expired".to_string()));
        }

        let password_hash = hash(new_password, DEFAULT_COST)?;
        Account::update_password(&self.pool, account.id, &password_hash).await?;

        // A password reset ends every session; change-password does not.
        self.sessions.deactivate_all(account.id).await?;

        self.events
            .enqueue_account_mutation(AccountMutation::InvalidateResetCode {
                account_id: account.id,
            });
        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "reset_password", true).with_request(ip, user_agent),
        );

        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn change_password(
        &self,
        account: &Account,
        current_password: &str,
        new_password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), ApiError> {
        if !verify(current_password, &account.password_hash)? {
            self.events.enqueue_audit(
                AuditEvent::new(Some(account.id), "change_password", false)
                    .with_request(ip, user_agent)
                    .with_details("current password mismatch"),
            );
            return Err(ApiError::Unauthorized("Current password is incorrect"));
        }

        validate_password(new_password, self.config.password_min_len)?;

        let password_hash = hash(new_password, DEFAULT_COST)?;
        Account::update_password(&self.pool, account.id, &password_hash).await?;

        self.events.enqueue_audit(
            AuditEvent::new(Some(account.id), "change_password", true)
                .with_request(ip, user_agent),
        );

        Ok(())
    }

    fn audit_login_failure(
        &self,
        account_id: Option<i64>,
        details: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) {
        self.events.enqueue_audit(
            AuditEvent::new(account_id, "login", false)
                .with_request(ip, user_agent)
                .with_details(details),
        );
    }
}

/// Minimum length plus one of each character class.
pub fn validate_password(password: &str, min_len: usize) -> Result<(), ApiError> {
    if password.chars().count() < min_len {
        return Err(ApiError::Validation(format!(
            "Password must be at least {min_len} characters"
        )));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::Validation(
            "Password must contain an uppercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::Validation(
            "Password must contain a lowercase letter".to_string(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::Validation(
            "Password must contain a digit".to_string(),
        ));
    }
    if password.chars().all(|c| c.is_alphanumeric()) {
        return Err(ApiError::Validation(
            "Password must contain a symbol".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ApiError::Validation(
            "Username must be 3-32 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::Validation(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    Ok(())
}

fn one_time_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
