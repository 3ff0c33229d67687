//! Admin masquerade (impersonation) session protocol.
//!
//! Lets a privileged user temporarily authenticate a session as another
//! user, then restore their own identity, without ever re-entering a
//! password. The protocol mutates only the session: the impersonator's
//! ID, a snapshot of their superuser flag, and a return location are
//! recorded under fixed session keys, and both transitions fire an
//! audit event attributed to the impersonator.
//!
//! # Rules
//!
//! - The requester must hold the `accounts.masquerade` capability
//!   (superusers hold it implicitly).
//! - Superusers can never be impersonated, not even by other superusers.
//! - Denied attempts leave the session untouched and are not audited.
//! - Ending is idempotent: a session that is not masquerading redirects
//!   without side effects.
//!
//! # Example
//!
//! ```rust,ignore
//! use quarterdeck::masquerade::{MasqueradeManager, MasqueradeConfig};
//!
//! let manager = MasqueradeManager::new(directory, permissions, events, config);
//!
//! let outcome = manager
//!     .begin_masquerade(&mut session, Some("user-456"), referer)
//!     .await?;
//!
//! // later, restore the admin's own identity
//! manager.end_masquerade(&mut session).await?;
//! ```

use crate::accounts::{Directory, PermissionChecker, User, MASQUERADE};
use crate::error::Result;
use crate::events::{AccountEvent, EventBus};
use crate::session::{AuthSession, FlashLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for the masquerade views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasqueradeConfig {
    /// Where unauthenticated requests are sent.
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// Landing page after a masquerade starts.
    #[serde(default = "default_landing_url")]
    pub landing_url: String,
    /// Fallback return page when the request carries no referer.
    #[serde(default = "default_return_url")]
    pub default_return_url: String,
}

fn default_login_url() -> String {
    "/login/".to_string()
}

fn default_landing_url() -> String {
    "/admin/".to_string()
}

fn default_return_url() -> String {
    "/admin/users/".to_string()
}

impl Default for MasqueradeConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            landing_url: default_landing_url(),
            default_return_url: default_return_url(),
        }
    }
}

/// Why a masquerade request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasqueradeDenied {
    /// The requesting session is not authenticated.
    NotAuthenticated,
    /// No target user was specified.
    MissingTarget,
    /// The target user ID does not resolve.
    UnknownUser(String),
    /// The requester lacks the masquerade capability.
    InsufficientPrivileges,
    /// The target is a superuser, which is always forbidden.
    TargetIsSuperuser,
}

impl MasqueradeDenied {
    /// The user-visible flash message, if any.
    ///
    /// Unauthenticated requests carry no message; they redirect to the
    /// login page.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::NotAuthenticated => None,
            Self::MissingTarget => Some("Masquerade failed: no user specified".to_string()),
            Self::UnknownUser(id) => Some(format!("Masquerade failed: unknown user {id}")),
            Self::InsufficientPrivileges => {
                Some("Masquerade failed: insufficient privileges".to_string())
            }
            Self::TargetIsSuperuser => Some("Cannot masquerade as a superuser".to_string()),
        }
    }

    /// The flash severity for the message.
    #[must_use]
    pub fn flash_level(&self) -> FlashLevel {
        match self {
            Self::TargetIsSuperuser => FlashLevel::Warning,
            _ => FlashLevel::Error,
        }
    }
}

/// Result of a `begin_masquerade` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The session now represents the target.
    Started {
        target_email: String,
        redirect: String,
    },
    /// The request was rejected; the session is untouched.
    Denied {
        reason: MasqueradeDenied,
        redirect: String,
    },
}

/// Result of an `end_masquerade` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// The impersonator's identity was restored.
    Ended { redirect: String },
    /// The session was not masquerading; nothing changed.
    NotMasquerading { redirect: String },
    /// The recorded impersonator no longer resolves. The failure is
    /// logged server-side and the user is redirected without an error.
    Degraded { redirect: String },
}

/// Validates impersonation requests and mutates session identity.
pub struct MasqueradeManager {
    directory: Arc<dyn Directory>,
    permissions: Arc<dyn PermissionChecker>,
    events: Arc<EventBus>,
    config: MasqueradeConfig,
}

impl MasqueradeManager {
    pub fn new(
        directory: Arc<dyn Directory>,
        permissions: Arc<dyn PermissionChecker>,
        events: Arc<EventBus>,
        config: MasqueradeConfig,
    ) -> Self {
        Self {
            directory,
            permissions,
            events,
            config,
        }
    }

    /// Assume the identity of `target_id` on the given session.
    ///
    /// Preconditions are checked in order, first failure wins: the
    /// session must be authenticated, the target must resolve, the
    /// requester must hold the masquerade capability, and the target
    /// must not be a superuser. A denial queues a flash message (except
    /// the unauthenticated case) and leaves the session untouched.
    ///
    /// On success the `masquerade_start` event fires before the identity
    /// swap, so the audit record is attributed to the impersonator with
    /// no masquerade context attached.
    pub async fn begin_masquerade(
        &self,
        session: &mut AuthSession,
        target_id: Option<&str>,
        referer: Option<&str>,
    ) -> Result<BeginOutcome> {
        let return_page = referer
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.config.default_return_url)
            .to_string();

        let actor = match self.requesting_user(session).await? {
            Some(actor) => actor,
            None => {
                return Ok(self.deny(
                    session,
                    MasqueradeDenied::NotAuthenticated,
                    self.config.login_url.clone(),
                ));
            }
        };

        let target_id = match target_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                return Ok(self.deny(session, MasqueradeDenied::MissingTarget, return_page));
            }
        };

        let target = match self.directory.find_by_id(target_id).await? {
            Some(target) => target,
            None => {
                tracing::error!(
                    target: "accounts.masquerade",
                    actor_email = %actor.email,
                    actor_id = %actor.id,
                    target_id = %target_id,
                    "masquerade failed: unknown target user"
                );
                return Ok(self.deny(
                    session,
                    MasqueradeDenied::UnknownUser(target_id.to_string()),
                    return_page,
                ));
            }
        };

        if !self.permissions.has_capability(&actor, MASQUERADE) {
            return Ok(self.deny(
                session,
                MasqueradeDenied::InsufficientPrivileges,
                return_page,
            ));
        }

        if target.is_superuser {
            tracing::warn!(
                target: "accounts.masquerade",
                actor_email = %actor.email,
                actor_id = %actor.id,
                target_email = %target.email,
                target_id = %target.id,
                "masquerade rejected: cannot masquerade as a superuser"
            );
            return Ok(self.deny(session, MasqueradeDenied::TargetIsSuperuser, return_page));
        }

        // The impersonator keeps the backend they authenticated with;
        // assuming the target's identity never re-checks a credential.
        let backend = session
            .backend()
            .unwrap_or(crate::session::PASSWORD_BACKEND)
            .to_string();

        // Fire before the swap so the audit record reads as the
        // impersonator acting on a still-normal session.
        self.events
            .dispatch(
                &AccountEvent::MasqueradeStarted {
                    actor: actor.clone(),
                    target: target.clone(),
                },
                session,
            )
            .await?;

        session.authenticate(&target.id, backend);
        session.set_masquerade(&actor.id, actor.is_superuser, &return_page);

        tracing::info!(
            target: "accounts.masquerade",
            actor_email = %actor.email,
            actor_id = %actor.id,
            target_email = %target.email,
            target_id = %target.id,
            "masquerading started"
        );
        session.flash_success(format!("Masquerading as user {}", target.email));

        Ok(BeginOutcome::Started {
            target_email: target.email,
            redirect: self.config.landing_url.clone(),
        })
    }

    /// Restore the impersonator's identity on the given session.
    ///
    /// Idempotent: a session without the masquerade marker redirects
    /// with no side effects. The `masquerade_end` event fires before the
    /// swap completes, so the audit message still names the target being
    /// left and carries the masquerade context.
    pub async fn end_masquerade(&self, session: &mut AuthSession) -> Result<EndOutcome> {
        if !session.is_masquerading() {
            return Ok(EndOutcome::NotMasquerading {
                redirect: self.config.landing_url.clone(),
            });
        }

        let redirect = session
            .return_page()
            .unwrap_or(&self.config.default_return_url)
            .to_string();

        let Some(impersonator_id) = session.masquerade_user_id().map(str::to_string) else {
            tracing::error!(
                target: "accounts.masquerade",
                severity = "critical",
                "masquerading session has no recorded impersonator id"
            );
            return Ok(EndOutcome::Degraded { redirect });
        };

        let Some(impersonator) = self.directory.find_by_id(&impersonator_id).await? else {
            tracing::error!(
                target: "accounts.masquerade",
                severity = "critical",
                impersonator_id = %impersonator_id,
                "masquerading user does not exist"
            );
            return Ok(EndOutcome::Degraded { redirect });
        };

        let target = match session.user_id() {
            Some(id) => self.directory.find_by_id(id).await?,
            None => None,
        };

        let backend = session
            .backend()
            .unwrap_or(crate::session::PASSWORD_BACKEND)
            .to_string();

        // Fire before the swap: the session still reads as masquerading,
        // so the record is attributed to the impersonator with the
        // masquerade context attached.
        if let Some(target) = &target {
            self.events
                .dispatch(
                    &AccountEvent::MasqueradeEnded {
                        actor: impersonator.clone(),
                        target: target.clone(),
                    },
                    session,
                )
                .await?;

            tracing::info!(
                target: "accounts.masquerade",
                target_email = %target.email,
                target_id = %target.id,
                actor_email = %impersonator.email,
                actor_id = %impersonator.id,
                "masquerading ended"
            );
        }

        session.authenticate(&impersonator.id, backend);
        session.clear_masquerade();
        session.flash_success("Masquerade ended");

        Ok(EndOutcome::Ended { redirect })
    }

    async fn requesting_user(&self, session: &AuthSession) -> Result<Option<User>> {
        match session.user_id() {
            Some(id) => self.directory.find_by_id(id).await,
            None => Ok(None),
        }
    }

    fn deny(
        &self,
        session: &mut AuthSession,
        reason: MasqueradeDenied,
        redirect: String,
    ) -> BeginOutcome {
        if let Some(message) = reason.message() {
            session.flash(reason.flash_level(), message);
        }
        BeginOutcome::Denied { reason, redirect }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{CapabilitySet, InMemoryDirectory};
    use crate::audit::{AuditConfig, AuditLogger, AuditSubscriber, AuditStore, InMemoryAuditStore};
    use crate::session::{PASSWORD_BACKEND, IS_MASQUERADING, MASQUERADE_IS_SUPERUSER, MASQUERADE_USER_ID, RETURN_PAGE};

    struct Fixture {
        directory: Arc<InMemoryDirectory>,
        permissions: Arc<CapabilitySet>,
        audit: Arc<InMemoryAuditStore>,
        manager: MasqueradeManager,
        superuser: User,
        superuser_2: User,
        staff: User,
        regular: User,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let permissions = Arc::new(CapabilitySet::new());
        let audit = Arc::new(InMemoryAuditStore::new());

        let superuser = User::new("superuser@example.com", "Super", "User").superuser();
        let superuser_2 = User::new("superuser2@example.com", "Super", "User 2").superuser();
        let staff = User::new("staffuser@example.com", "Staff", "User").staff();
        let regular = User::new("regularuser@example.com", "Regular", "User");

        for user in [&superuser, &superuser_2, &staff, &regular] {
            directory.add_user(user.clone()).await;
        }

        let logger = AuditLogger::new(
            AuditConfig { enabled: true },
            directory.clone(),
            audit.clone(),
        );
        let events = Arc::new(EventBus::new().subscribe(Arc::new(AuditSubscriber::new(logger))));

        let manager = MasqueradeManager::new(
            directory.clone(),
            permissions.clone(),
            events,
            MasqueradeConfig::default(),
        );

        Fixture {
            directory,
            permissions,
            audit,
            manager,
            superuser,
            superuser_2,
            staff,
            regular,
        }
    }

    fn session_for(user: &User) -> AuthSession {
        let mut session = AuthSession::new();
        session.authenticate(&user.id, PASSWORD_BACKEND);
        session
    }

    #[tokio::test]
    async fn test_superuser_masquerades_as_regular_user() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        assert!(matches!(outcome, BeginOutcome::Started { .. }));
        assert_eq!(session.user_id(), Some(f.regular.id.as_str()));
        assert!(session.is_masquerading());
        assert_eq!(session.masquerade_user_id(), Some(f.superuser.id.as_str()));
        assert!(session.masquerade_is_superuser());
        assert_eq!(session.return_page(), Some("/admin/users/"));
    }

    #[tokio::test]
    async fn test_referer_becomes_return_page() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        f.manager
            .begin_masquerade(&mut session, Some(&f.staff.id), Some("/admin/users/?page=2"))
            .await
            .unwrap();

        assert_eq!(session.return_page(), Some("/admin/users/?page=2"));
    }

    #[tokio::test]
    async fn test_unauthenticated_session_redirects_to_login() {
        let f = fixture().await;
        let mut session = AuthSession::new();

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        match outcome {
            BeginOutcome::Denied { reason, redirect } => {
                assert_eq!(reason, MasqueradeDenied::NotAuthenticated);
                assert_eq!(redirect, "/login/");
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!session.is_authenticated());
        assert!(session.flashes().is_empty());
        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_target_is_an_input_error() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        let outcome = f
            .manager
            .begin_masquerade(&mut session, None, None)
            .await
            .unwrap();

        match outcome {
            BeginOutcome::Denied { reason, .. } => {
                assert_eq!(reason, MasqueradeDenied::MissingTarget);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!session.is_masquerading());
        let flashes = session.take_flashes();
        assert_eq!(flashes[0].message, "Masquerade failed: no user specified");
    }

    #[tokio::test]
    async fn test_unknown_target_denied_before_capability_check() {
        let f = fixture().await;
        // no capability either, but the unknown-user failure wins
        let mut session = session_for(&f.regular);

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some("missing-id"), None)
            .await
            .unwrap();

        match outcome {
            BeginOutcome::Denied { reason, .. } => {
                assert_eq!(reason, MasqueradeDenied::UnknownUser("missing-id".to_string()));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        let flashes = session.take_flashes();
        assert_eq!(
            flashes[0].message,
            "Masquerade failed: unknown user missing-id"
        );
    }

    #[tokio::test]
    async fn test_without_capability_session_is_untouched() {
        let f = fixture().await;
        let mut session = session_for(&f.staff);
        let before = session.clone();

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        match outcome {
            BeginOutcome::Denied { reason, .. } => {
                assert_eq!(reason, MasqueradeDenied::InsufficientPrivileges);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(session.user_id(), before.user_id());
        assert!(!session.is_masquerading());
        assert!(session.get(IS_MASQUERADING).is_none());
        assert!(session.get(MASQUERADE_USER_ID).is_none());
        assert!(session.get(MASQUERADE_IS_SUPERUSER).is_none());
        assert!(session.get(RETURN_PAGE).is_none());
    }

    #[tokio::test]
    async fn test_denied_attempts_are_not_audited() {
        let f = fixture().await;
        let mut session = session_for(&f.staff);

        f.manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_superuser_target_is_always_forbidden() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some(&f.superuser_2.id), None)
            .await
            .unwrap();

        match outcome {
            BeginOutcome::Denied { reason, .. } => {
                assert_eq!(reason, MasqueradeDenied::TargetIsSuperuser);
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(session.user_id(), Some(f.superuser.id.as_str()));
        assert!(!session.is_masquerading());

        let flashes = session.take_flashes();
        assert_eq!(flashes[0].level, FlashLevel::Warning);
        assert_eq!(flashes[0].message, "Cannot masquerade as a superuser");
        assert!(f.audit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_granted_staff_user_masquerades_without_superuser_snapshot() {
        let f = fixture().await;
        f.permissions.grant(&f.staff.id, MASQUERADE);
        let mut session = session_for(&f.staff);

        let outcome = f
            .manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        assert!(matches!(outcome, BeginOutcome::Started { .. }));
        assert_eq!(session.user_id(), Some(f.regular.id.as_str()));
        assert_eq!(session.masquerade_user_id(), Some(f.staff.id.as_str()));
        assert!(!session.masquerade_is_superuser());

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].message,
            format!("Masquerade start as {} ({})", f.regular.email, f.regular.id)
        );
        assert_eq!(events[0].user_id, f.staff.id);
        assert_eq!(events[0].user_email, f.staff.email);
    }

    #[tokio::test]
    async fn test_start_audit_record_has_no_masquerade_context() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        f.manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_masquerading());
    }

    #[tokio::test]
    async fn test_begin_then_end_restores_identity() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        f.manager
            .begin_masquerade(&mut session, Some(&f.regular.id), Some("/admin/users/?q=x"))
            .await
            .unwrap();

        let outcome = f.manager.end_masquerade(&mut session).await.unwrap();

        match outcome {
            EndOutcome::Ended { redirect } => assert_eq!(redirect, "/admin/users/?q=x"),
            other => panic!("expected end, got {other:?}"),
        }
        assert_eq!(session.user_id(), Some(f.superuser.id.as_str()));
        assert_eq!(session.backend(), Some(PASSWORD_BACKEND));
        assert!(!session.is_masquerading());
        assert!(session.get(IS_MASQUERADING).is_none());
        assert!(session.get(MASQUERADE_USER_ID).is_none());
        assert!(session.get(MASQUERADE_IS_SUPERUSER).is_none());
        assert!(session.get(RETURN_PAGE).is_none());
    }

    #[tokio::test]
    async fn test_end_audit_record_names_target_and_carries_context() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        f.manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();
        f.manager.end_masquerade(&mut session).await.unwrap();

        let events = f.audit.events().await.unwrap();
        assert_eq!(events.len(), 2);

        let end = &events[1];
        assert_eq!(
            end.message,
            format!("Masquerade end as {} ({})", f.regular.email, f.regular.id)
        );
        // attributed to the impersonator, with the masquerade context
        // still attached because the event fired before the swap
        assert_eq!(end.user_id, f.superuser.id);
        assert!(end.is_masquerading());
        assert_eq!(
            end.masquerading_user_email.as_deref(),
            Some(f.superuser.email.as_str())
        );
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        let outcome = f.manager.end_masquerade(&mut session).await.unwrap();
        assert!(matches!(outcome, EndOutcome::NotMasquerading { .. }));
        assert_eq!(session.user_id(), Some(f.superuser.id.as_str()));
        assert!(f.audit.events().await.unwrap().is_empty());

        // twice in a row is still safe
        let outcome = f.manager.end_masquerade(&mut session).await.unwrap();
        assert!(matches!(outcome, EndOutcome::NotMasquerading { .. }));
    }

    #[tokio::test]
    async fn test_dangling_impersonator_degrades_gracefully() {
        let f = fixture().await;
        let mut session = session_for(&f.superuser);

        f.manager
            .begin_masquerade(&mut session, Some(&f.regular.id), None)
            .await
            .unwrap();

        f.directory.remove_user(&f.superuser.id).await;

        let outcome = f.manager.end_masquerade(&mut session).await.unwrap();
        assert!(matches!(outcome, EndOutcome::Degraded { .. }));
        // the session is left as-is: still authenticated as the target
        assert_eq!(session.user_id(), Some(f.regular.id.as_str()));
        assert!(session.is_masquerading());
    }

    #[tokio::test]
    async fn test_disabled_audit_log_records_nothing() {
        let directory = Arc::new(InMemoryDirectory::new());
        let permissions = Arc::new(CapabilitySet::new());
        let audit = Arc::new(InMemoryAuditStore::new());

        let superuser = User::new("superuser@example.com", "Super", "User").superuser();
        let regular = User::new("regularuser@example.com", "Regular", "User");
        directory.add_user(superuser.clone()).await;
        directory.add_user(regular.clone()).await;

        let logger = AuditLogger::new(AuditConfig::default(), directory.clone(), audit.clone());
        let events = Arc::new(EventBus::new().subscribe(Arc::new(AuditSubscriber::new(logger))));
        let manager = MasqueradeManager::new(
            directory,
            permissions,
            events,
            MasqueradeConfig::default(),
        );

        let mut session = session_for(&superuser);
        manager
            .begin_masquerade(&mut session, Some(&regular.id), None)
            .await
            .unwrap();
        manager.end_masquerade(&mut session).await.unwrap();

        assert!(audit.events().await.unwrap().is_empty());
    }
}
