//! Authenticated-session state.
//!
//! [`AuthSession`] is the only mutable state the masquerade protocol owns:
//! the authenticated principal, the backend it authenticated with, a
//! key/value map holding the masquerade markers, and pending flash
//! messages. Persisting the session across requests is the host's
//! concern, abstracted behind [`SessionStore`]; within one request the
//! session is read, mutated, and written back as a unit.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session key marking an active masquerade.
pub const IS_MASQUERADING: &str = "is_masquerading";
/// Session key holding the impersonator's user ID.
pub const MASQUERADE_USER_ID: &str = "masquerade_user_id";
/// Session key holding the impersonator's superuser snapshot.
pub const MASQUERADE_IS_SUPERUSER: &str = "masquerade_is_superuser";
/// Session key holding where to navigate after ending a masquerade.
pub const RETURN_PAGE: &str = "return_page";

/// Backend name recorded for password-authenticated sessions.
pub const PASSWORD_BACKEND: &str = "quarterdeck.password";

/// Severity of a flash message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Warning,
    Error,
}

/// A one-shot message shown to the user on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

/// Per-browser-session authentication state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSession {
    user_id: Option<String>,
    backend: Option<String>,
    data: HashMap<String, String>,
    flashes: Vec<Flash>,
}

impl AuthSession {
    /// Create an unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// The authenticated principal's ID, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The backend the session authenticated with.
    #[must_use]
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    /// Authenticate the session as the given principal.
    ///
    /// Session data and pending flashes survive the identity change; this
    /// is what lets the masquerade markers outlive the swap.
    pub fn authenticate(&mut self, user_id: impl Into<String>, backend: impl Into<String>) {
        self.user_id = Some(user_id.into());
        self.backend = Some(backend.into());
    }

    /// Log the session out entirely, dropping identity and data.
    ///
    /// Pending flashes are kept so a sign-out confirmation can still be
    /// shown.
    pub fn clear(&mut self) {
        self.user_id = None;
        self.backend = None;
        self.data.clear();
    }

    /// Get a raw session value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Set a raw session value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    /// Remove a raw session value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.data.remove(key)
    }

    /// Whether the session currently represents a masquerade.
    #[must_use]
    pub fn is_masquerading(&self) -> bool {
        self.get(IS_MASQUERADING) == Some("true")
    }

    /// The impersonator's user ID recorded at masquerade start.
    #[must_use]
    pub fn masquerade_user_id(&self) -> Option<&str> {
        self.get(MASQUERADE_USER_ID)
    }

    /// The impersonator's superuser flag snapshot.
    #[must_use]
    pub fn masquerade_is_superuser(&self) -> bool {
        self.get(MASQUERADE_IS_SUPERUSER) == Some("true")
    }

    /// Where to navigate after the masquerade ends.
    #[must_use]
    pub fn return_page(&self) -> Option<&str> {
        self.get(RETURN_PAGE)
    }

    /// Record the masquerade markers for an impersonation session.
    pub fn set_masquerade(
        &mut self,
        impersonator_id: impl Into<String>,
        impersonator_is_superuser: bool,
        return_page: impl Into<String>,
    ) {
        self.set(IS_MASQUERADING, "true");
        self.set(MASQUERADE_USER_ID, impersonator_id.into());
        self.set(
            MASQUERADE_IS_SUPERUSER,
            if impersonator_is_superuser {
                "true"
            } else {
                "false"
            },
        );
        self.set(RETURN_PAGE, return_page.into());
    }

    /// Remove all four masquerade markers.
    pub fn clear_masquerade(&mut self) {
        self.remove(IS_MASQUERADING);
        self.remove(MASQUERADE_USER_ID);
        self.remove(MASQUERADE_IS_SUPERUSER);
        self.remove(RETURN_PAGE);
    }

    /// Queue a flash message.
    pub fn flash(&mut self, level: FlashLevel, message: impl Into<String>) {
        self.flashes.push(Flash {
            level,
            message: message.into(),
        });
    }

    /// Queue a success flash.
    pub fn flash_success(&mut self, message: impl Into<String>) {
        self.flash(FlashLevel::Success, message);
    }

    /// Queue a warning flash.
    pub fn flash_warning(&mut self, message: impl Into<String>) {
        self.flash(FlashLevel::Warning, message);
    }

    /// Queue an error flash.
    pub fn flash_error(&mut self, message: impl Into<String>) {
        self.flash(FlashLevel::Error, message);
    }

    /// Drain and return pending flash messages.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }

    /// Peek at pending flash messages without draining them.
    #[must_use]
    pub fn flashes(&self) -> &[Flash] {
        &self.flashes
    }
}

/// Session persistence boundary.
///
/// The protocol treats the store as atomic per request: load once,
/// mutate, save once.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by its ID. `Ok(None)` if it doesn't exist.
    async fn load(&self, session_id: &str) -> Result<Option<AuthSession>>;

    /// Save a session under the given ID.
    async fn save(&self, session_id: &str, session: &AuthSession) -> Result<()>;

    /// Delete a session.
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-memory session store.
///
/// Suitable for development and testing; sessions are lost on restart
/// and not shared across instances.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<AuthSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, session: &AuthSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
