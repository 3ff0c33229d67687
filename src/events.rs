//! Account event bus.
//!
//! Named notifications decouple the identity/session logic from the
//! audit recorder and any other interested subscriber. Dispatch is
//! explicit and synchronous: subscribers run in registration order
//! before the response is returned, so an event fired before an
//! identity swap is recorded against the pre-swap state.

use crate::accounts::User;
use crate::error::Result;
use crate::session::AuthSession;
use async_trait::async_trait;
use std::sync::Arc;

/// A security-relevant account event.
///
/// Events carry full copies of the records involved, taken at the moment
/// the event fired, so subscribers see the state the action was
/// performed against.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// A user signed in.
    SignedIn { user: User },
    /// A user signed out.
    SignedOut { user: User },
    /// An impersonator assumed a target's identity.
    MasqueradeStarted { actor: User, target: User },
    /// An impersonator restored their own identity.
    MasqueradeEnded { actor: User, target: User },
    /// A password reset email was requested.
    PasswordResetRequested { user: User },
    /// A user changed their password.
    PasswordChanged { user: User },
    /// An administrator created a user.
    UserCreated { actor: User, user: User },
    /// A user's email address changed.
    EmailChanged {
        user: User,
        old_email: String,
        new_email: String,
    },
    /// An administrator deactivated a user.
    UserDeactivated { actor: User, user: User },
    /// An administrator reactivated a user.
    UserActivated { actor: User, user: User },
    /// A company was renamed.
    CompanyRenamed {
        actor: User,
        company_id: String,
        old_name: String,
        new_name: String,
    },
}

impl AccountEvent {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignedIn { .. } => "signed_in",
            Self::SignedOut { .. } => "signed_out",
            Self::MasqueradeStarted { .. } => "masquerade_started",
            Self::MasqueradeEnded { .. } => "masquerade_ended",
            Self::PasswordResetRequested { .. } => "password_reset_requested",
            Self::PasswordChanged { .. } => "password_changed",
            Self::UserCreated { .. } => "user_created",
            Self::EmailChanged { .. } => "email_changed",
            Self::UserDeactivated { .. } => "user_deactivated",
            Self::UserActivated { .. } => "user_activated",
            Self::CompanyRenamed { .. } => "company_renamed",
        }
    }
}

/// A subscriber notified of every dispatched event.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle one event. Errors propagate to the dispatching request.
    async fn on_event(&self, event: &AccountEvent, session: &AuthSession) -> Result<()>;
}

/// Synchronous in-process event bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers run in registration order.
    #[must_use]
    pub fn subscribe(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Dispatch an event to every subscriber, in order.
    ///
    /// The session is the one the triggering request carries; subscribers
    /// read its masquerade markers but must not mutate it.
    pub async fn dispatch(&self, event: &AccountEvent, session: &AuthSession) -> Result<()> {
        tracing::debug!(target: "accounts.events", event = event.name(), "dispatching");
        for subscriber in &self.subscribers {
            subscriber.on_event(event, session).await?;
        }
        Ok(())
    }
}
