//! Audit log of security-relevant account events.
//!
//! Records are append-only and denormalized: the acting user's email and
//! company name are frozen at write time so later profile or company
//! changes never rewrite history. A deletion request against the store
//! is a silent no-op.

use crate::accounts::{Directory, User};
use crate::error::{QuarterdeckError, Result};
use crate::events::{AccountEvent, EventSubscriber};
use crate::session::AuthSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Audit logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// When disabled, no trigger of any kind produces a record.
    #[serde(default)]
    pub enabled: bool,
}

/// An immutable record of a security-relevant action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogEvent {
    /// Unique identifier.
    pub id: String,
    /// When the record was written.
    pub recorded_on: DateTime<Utc>,
    /// Acting user's ID.
    pub user_id: String,
    /// Acting user's email, frozen at write time.
    pub user_email: String,
    /// Acting user's company at write time, if any.
    pub company_id: Option<String>,
    /// Company name frozen at write time; empty when no company.
    pub company_name: String,
    /// Free-text audit message.
    pub message: String,
    /// Impersonator's ID when the action happened during a masquerade.
    pub masquerading_user_id: Option<String>,
    /// Impersonator's email, frozen at write time.
    pub masquerading_user_email: Option<String>,
}

impl AuditLogEvent {
    /// Whether the recorded action happened during a masquerade.
    #[must_use]
    pub fn is_masquerading(&self) -> bool {
        self.masquerading_user_id.is_some()
    }
}

impl std::fmt::Display for AuditLogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(masquerading_email) = &self.masquerading_user_email {
            write!(
                f,
                "{} {} [{}] {}",
                self.recorded_on, self.user_email, masquerading_email, self.message
            )
        } else {
            write!(f, "{} {} {}", self.recorded_on, self.user_email, self.message)
        }
    }
}

/// Pluggable persistence for audit records.
///
/// Deployments that need a richer record schema implement this trait
/// and stamp their own fields in `append`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one record.
    async fn append(&self, event: &AuditLogEvent) -> Result<()>;

    /// List all records, oldest first.
    async fn events(&self) -> Result<Vec<AuditLogEvent>>;

    /// Deleting audit history is not supported; requests are silently
    /// ignored so callers cannot distinguish them from success.
    async fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// In-memory audit store.
///
/// Suitable for development and testing.
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    events: Arc<RwLock<Vec<AuditLogEvent>>>,
}

impl InMemoryAuditStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: &AuditLogEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn events(&self) -> Result<Vec<AuditLogEvent>> {
        Ok(self.events.read().await.clone())
    }
}

/// Builds and persists audit records.
pub struct AuditLogger {
    config: AuditConfig,
    directory: Arc<dyn Directory>,
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(
        config: AuditConfig,
        directory: Arc<dyn Directory>,
        store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            directory,
            store,
        }
    }

    /// Record one audit event.
    ///
    /// No-op when audit logging is disabled or the actor is absent. When
    /// the session is masquerading, the impersonator is resolved freshly
    /// from the session's recorded ID and attached to the same record.
    /// Persistence failures propagate to the caller.
    pub async fn log(
        &self,
        message: impl Into<String>,
        actor: Option<&User>,
        session: &AuthSession,
    ) -> Result<Option<AuditLogEvent>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let Some(actor) = actor else {
            return Ok(None);
        };

        let company = self.directory.company_of(actor).await?;
        let mut event = AuditLogEvent {
            id: Uuid::new_v4().to_string(),
            recorded_on: Utc::now(),
            user_id: actor.id.clone(),
            user_email: actor.email.clone(),
            company_id: company.as_ref().map(|c| c.id.clone()),
            company_name: company.map(|c| c.name).unwrap_or_default(),
            message: message.into(),
            masquerading_user_id: None,
            masquerading_user_email: None,
        };

        if session.is_masquerading() {
            if let Some(impersonator_id) = session.masquerade_user_id() {
                let impersonator = self
                    .directory
                    .find_by_id(impersonator_id)
                    .await?
                    .ok_or_else(|| {
                        QuarterdeckError::not_found(format!(
                            "masquerading user {impersonator_id} does not exist"
                        ))
                    })?;
                event.masquerading_user_id = Some(impersonator.id);
                event.masquerading_user_email = Some(impersonator.email);
            }
        }

        self.store.append(&event).await?;
        Ok(Some(event))
    }
}

/// Event-bus subscriber feeding the audit logger.
///
/// Maps each account event to its audit message. The record's subject is
/// the event's subject user: for administrative actions (create,
/// activate, deactivate) that is the affected user, while the message
/// names the acting administrator.
pub struct AuditSubscriber {
    logger: AuditLogger,
}

impl AuditSubscriber {
    pub fn new(logger: AuditLogger) -> Self {
        Self { logger }
    }

    fn render(event: &AccountEvent) -> (String, &User) {
        match event {
            AccountEvent::SignedIn { user } => ("Sign in".to_string(), user),
            AccountEvent::SignedOut { user } => ("Sign out".to_string(), user),
            AccountEvent::MasqueradeStarted { actor, target } => (
                format!("Masquerade start as {} ({})", target.email, target.id),
                actor,
            ),
            AccountEvent::MasqueradeEnded { actor, target } => (
                format!("Masquerade end as {} ({})", target.email, target.id),
                actor,
            ),
            AccountEvent::PasswordResetRequested { user } => {
                ("Request password reset".to_string(), user)
            }
            AccountEvent::PasswordChanged { user } => ("Change password".to_string(), user),
            AccountEvent::UserCreated { actor, user } => {
                (format!("Create by: {} ({})", actor.email, actor.id), user)
            }
            AccountEvent::EmailChanged {
                user,
                old_email,
                new_email,
            } => (
                format!("Email change from: {old_email} to: {new_email}"),
                user,
            ),
            AccountEvent::UserDeactivated { actor, user } => (
                format!("Deactivate by: {} ({})", actor.email, actor.id),
                user,
            ),
            AccountEvent::UserActivated { actor, user } => {
                (format!("Activate by: {} ({})", actor.email, actor.id), user)
            }
            AccountEvent::CompanyRenamed {
                actor,
                company_id,
                old_name,
                new_name,
            } => (
                format!("Company id: {company_id} name change from: {old_name} to: {new_name}"),
                actor,
            ),
        }
    }
}

#[async_trait]
impl EventSubscriber for AuditSubscriber {
    async fn on_event(&self, event: &AccountEvent, session: &AuthSession) -> Result<()> {
        let (message, subject) = Self::render(event);
        self.logger.log(message, Some(subject), session).await?;
        Ok(())
    }
}
