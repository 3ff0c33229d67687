//! Credential and session flows: sign in, sign out, password change,
//! password-reset requests.
//!
//! Each successful flow fires its event on the bus, which is what feeds
//! the audit log. Sign-out is masquerade-aware: logging out while
//! impersonating ends the masquerade instead of destroying the
//! impersonator's session.

use crate::accounts::{Directory, User};
use crate::error::{QuarterdeckError, Result};
use crate::events::{AccountEvent, EventBus};
use crate::lockout::LockoutTracker;
use crate::mailer::{Email, Mailer};
use crate::password::{ComplexPasswordPolicy, PasswordHasher};
use crate::session::{AuthSession, PASSWORD_BACKEND};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for the account flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Sender address for account emails.
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Where a successful sign-in lands.
    #[serde(default = "default_login_redirect")]
    pub login_redirect_url: String,
    /// Where sign-out lands.
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// The end-masquerade view, used by masquerade-aware sign-out.
    #[serde(default = "default_end_masquerade_url")]
    pub end_masquerade_url: String,
}

fn default_from_address() -> String {
    "noreply@example.com".to_string()
}

fn default_login_redirect() -> String {
    "/".to_string()
}

fn default_login_url() -> String {
    "/login/".to_string()
}

fn default_end_masquerade_url() -> String {
    "/admin/masquerade/end/".to_string()
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            login_redirect_url: default_login_redirect(),
            login_url: default_login_url(),
            end_masquerade_url: default_end_masquerade_url(),
        }
    }
}

/// Result of a sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The session is now authenticated.
    LoggedIn { user_id: String, redirect: String },
    /// Unknown email, inactive account, or wrong password. The three
    /// cases are indistinguishable to the caller.
    InvalidCredentials,
    /// Too many failures; the account is in its cooloff window.
    LockedOut { redirect: String },
}

/// Result of a sign-out request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The session was masquerading; end the masquerade instead.
    EndMasquerade { redirect: String },
    /// The session was logged out.
    LoggedOut { redirect: String },
}

/// Credential and session flows.
pub struct AccountFlows {
    directory: Arc<dyn Directory>,
    events: Arc<EventBus>,
    lockout: Arc<LockoutTracker>,
    mailer: Arc<dyn Mailer>,
    hasher: PasswordHasher,
    policy: ComplexPasswordPolicy,
    config: FlowsConfig,
}

impl AccountFlows {
    pub fn new(
        directory: Arc<dyn Directory>,
        events: Arc<EventBus>,
        lockout: Arc<LockoutTracker>,
        mailer: Arc<dyn Mailer>,
        hasher: PasswordHasher,
        config: FlowsConfig,
    ) -> Self {
        Self {
            directory,
            events,
            lockout,
            mailer,
            hasher,
            policy: ComplexPasswordPolicy::new(),
            config,
        }
    }

    /// The active password policy.
    #[must_use]
    pub fn policy(&self) -> &ComplexPasswordPolicy {
        &self.policy
    }

    /// Authenticate a session with an email and password.
    ///
    /// Emails compare case-insensitively. Failures feed the lockout
    /// counter; success clears it, stamps `last_login`, and fires
    /// `SignedIn`.
    pub async fn login(
        &self,
        session: &mut AuthSession,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let email = email.to_lowercase();

        if self.lockout.is_locked(&email).await? {
            return Ok(LoginOutcome::LockedOut {
                redirect: self.lockout.policy().lockout_url.clone(),
            });
        }

        let verified = match self.directory.find_by_email(&email).await? {
            Some(user) if user.is_active && !user.password_hash.is_empty() => {
                if self.hasher.verify(password, &user.password_hash)? {
                    Some(user)
                } else {
                    None
                }
            }
            _ => None,
        };

        let Some(mut user) = verified else {
            tracing::info!(target: "accounts.login", email = %email, "sign in failed");
            let now_locked = self.lockout.record_failure(&email).await?;
            return Ok(if now_locked {
                LoginOutcome::LockedOut {
                    redirect: self.lockout.policy().lockout_url.clone(),
                }
            } else {
                LoginOutcome::InvalidCredentials
            });
        };

        self.lockout.reset(&email).await?;
        user.last_login = Some(Utc::now());
        self.directory.save_user(&user).await?;

        session.authenticate(&user.id, PASSWORD_BACKEND);
        self.events
            .dispatch(&AccountEvent::SignedIn { user: user.clone() }, session)
            .await?;

        Ok(LoginOutcome::LoggedIn {
            user_id: user.id,
            redirect: self.config.login_redirect_url.clone(),
        })
    }

    /// Sign out, or — when the session is masquerading — hand off to the
    /// end-masquerade view so "logout" never destroys the impersonator's
    /// own session.
    pub async fn logout(&self, session: &mut AuthSession) -> Result<LogoutOutcome> {
        if session.is_masquerading() {
            return Ok(LogoutOutcome::EndMasquerade {
                redirect: self.config.end_masquerade_url.clone(),
            });
        }

        if let Some(user_id) = session.user_id() {
            if let Some(user) = self.directory.find_by_id(user_id).await? {
                self.events
                    .dispatch(&AccountEvent::SignedOut { user }, session)
                    .await?;
            }
        }

        session.clear();
        Ok(LogoutOutcome::LoggedOut {
            redirect: self.config.login_url.clone(),
        })
    }

    /// Change the authenticated user's password.
    ///
    /// The current password must verify and the new one must satisfy the
    /// complex policy. Fires `PasswordChanged`.
    pub async fn change_password(
        &self,
        session: &AuthSession,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user_id = session
            .user_id()
            .ok_or_else(|| QuarterdeckError::unauthorized("Sign in to change your password"))?;
        let mut user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| QuarterdeckError::not_found("Unknown user"))?;

        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(QuarterdeckError::bad_request("Current password is incorrect"));
        }
        self.policy.check(new_password)?;

        user.password_hash = self.hasher.hash(new_password)?;
        user.updated_on = Utc::now();
        self.directory.save_user(&user).await?;

        self.events
            .dispatch(&AccountEvent::PasswordChanged { user }, session)
            .await?;
        Ok(())
    }

    /// Request a password-reset email.
    ///
    /// Unknown addresses are silently ignored so the endpoint does not
    /// reveal which emails exist. Known addresses get a reset email and
    /// fire `PasswordResetRequested`.
    pub async fn request_password_reset(
        &self,
        session: &AuthSession,
        email: &str,
    ) -> Result<()> {
        let Some(user) = self.directory.find_by_email(email).await? else {
            return Ok(());
        };

        self.send_reset_email(&user).await?;
        self.events
            .dispatch(&AccountEvent::PasswordResetRequested { user }, session)
            .await?;
        Ok(())
    }

    pub(crate) async fn send_reset_email(&self, user: &User) -> Result<()> {
        self.mailer
            .send(&Email::new(
                &self.config.from_address,
                &user.email,
                "Password reset",
                format!(
                    "Hello {},\n\nFollow the link in your account page to choose a new password.",
                    user.full_name()
                ),
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryDirectory;
    use crate::audit::{AuditConfig, AuditLogger, AuditSubscriber, AuditStore, InMemoryAuditStore};
    use crate::lockout::{InMemoryLockoutStore, LockoutPolicy};
    use crate::mailer::RecordingMailer;
    use crate::password::PasswordConfig;

    struct Fixture {
        directory: Arc<InMemoryDirectory>,
        audit: Arc<InMemoryAuditStore>,
        mailer: RecordingMailer,
        flows: AccountFlows,
        user: User,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let mailer = RecordingMailer::new();
        let hasher = PasswordHasher::new(PasswordConfig::fast());

        let mut user = User::new("alice@example.com", "Alice", "Smith");
        user.password_hash = hasher.hash("aab1234AAAA$#").unwrap();
        directory.add_user(user.clone()).await;

        let logger = AuditLogger::new(
            AuditConfig { enabled: true },
            directory.clone(),
            audit.clone(),
        );
        let events = Arc::new(EventBus::new().subscribe(Arc::new(AuditSubscriber::new(logger))));
        let lockout = Arc::new(LockoutTracker::new(
            Arc::new(InMemoryLockoutStore::new()),
            LockoutPolicy::default(),
        ));

        let flows = AccountFlows::new(
            directory.clone(),
            events,
            lockout,
            Arc::new(mailer.clone()),
            hasher,
            FlowsConfig::default(),
        );

        Fixture {
            directory,
            audit,
            mailer,
            flows,
            user,
        }
    }

    #[tokio::test]
    async fn test_login_success_fires_sign_in() {
        let f = fixture().await;
        let mut session = AuthSession::new();

        let outcome = f
            .flows
            .login(&mut session, "Alice@Example.com", "aab1234AAAA$#")
            .await
            .unwrap();

        assert!(matches!(outcome, LoginOutcome::LoggedIn { .. }));
        assert_eq!(session.user_id(), Some(f.user.id.as_str()));

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Sign in");
        assert_eq!(events[0].user_email, "alice@example.com");

        let stored = f.directory.find_by_id(&f.user.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn test_login_wrong_password_is_uniform_failure() {
        let f = fixture().await;
        let mut session = AuthSession::new();

        let outcome = f
            .flows
            .login(&mut session, "alice@example.com", "wrong")
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::InvalidCredentials);
        assert!(!session.is_authenticated());
        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_login_inactive_user_rejected() {
        let f = fixture().await;
        let mut user = f.user.clone();
        user.is_active = false;
        f.directory.save_user(&user).await.unwrap();

        let mut session = AuthSession::new();
        let outcome = f
            .flows
            .login(&mut session, "alice@example.com", "aab1234AAAA$#")
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_repeated_failures_lock_out() {
        let f = fixture().await;
        let mut session = AuthSession::new();

        let mut last = LoginOutcome::InvalidCredentials;
        for _ in 0..3 {
            last = f
                .flows
                .login(&mut session, "alice@example.com", "wrong")
                .await
                .unwrap();
        }
        assert!(matches!(last, LoginOutcome::LockedOut { .. }));

        // even the right password is refused while locked
        let outcome = f
            .flows
            .login(&mut session, "alice@example.com", "aab1234AAAA$#")
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::LockedOut { .. }));
    }

    #[tokio::test]
    async fn test_logout_fires_sign_out_and_clears_session() {
        let f = fixture().await;
        let mut session = AuthSession::new();
        f.flows
            .login(&mut session, "alice@example.com", "aab1234AAAA$#")
            .await
            .unwrap();

        let outcome = f.flows.logout(&mut session).await.unwrap();
        assert!(matches!(outcome, LogoutOutcome::LoggedOut { .. }));
        assert!(!session.is_authenticated());

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].message, "Sign out");
    }

    #[tokio::test]
    async fn test_logout_while_masquerading_ends_masquerade_instead() {
        let f = fixture().await;
        let mut session = AuthSession::new();
        session.authenticate(&f.user.id, PASSWORD_BACKEND);
        session.set_masquerade("admin-1", true, "/admin/users/");

        let outcome = f.flows.logout(&mut session).await.unwrap();
        match outcome {
            LogoutOutcome::EndMasquerade { redirect } => {
                assert_eq!(redirect, "/admin/masquerade/end/");
            }
            other => panic!("expected masquerade handoff, got {other:?}"),
        }
        // the session itself is untouched; the end-masquerade view does
        // the actual restore
        assert!(session.is_authenticated());
        assert!(session.is_masquerading());
        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_happy_path() {
        let f = fixture().await;
        let mut session = AuthSession::new();
        session.authenticate(&f.user.id, PASSWORD_BACKEND);

        f.flows
            .change_password(&session, "aab1234AAAA$#", "bbc5678BBBB$!")
            .await
            .unwrap();

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Change password");

        // the new password now verifies
        let mut fresh = AuthSession::new();
        let outcome = f
            .flows
            .login(&mut fresh, "alice@example.com", "bbc5678BBBB$!")
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::LoggedIn { .. }));
    }

    #[tokio::test]
    async fn test_change_password_rejects_wrong_current() {
        let f = fixture().await;
        let mut session = AuthSession::new();
        session.authenticate(&f.user.id, PASSWORD_BACKEND);

        let result = f
            .flows
            .change_password(&session, "wrong", "bbc5678BBBB$!")
            .await;
        assert!(result.is_err());
        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_enforces_policy() {
        let f = fixture().await;
        let mut session = AuthSession::new();
        session.authenticate(&f.user.id, PASSWORD_BACKEND);

        let result = f
            .flows
            .change_password(&session, "aab1234AAAA$#", "weak")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_password_reset_request_known_email() {
        let f = fixture().await;
        let session = AuthSession::new();

        f.flows
            .request_password_reset(&session, "alice@example.com")
            .await
            .unwrap();

        assert_eq!(f.mailer.sent().await.len(), 1);
        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Request password reset");
        assert_eq!(events[0].user_email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_password_reset_request_unknown_email_is_silent() {
        let f = fixture().await;
        let session = AuthSession::new();

        f.flows
            .request_password_reset(&session, "nobody@example.com")
            .await
            .unwrap();

        assert!(f.mailer.sent().await.is_empty());
        assert!(f.audit.events().await.unwrap().is_empty());
    }
}
