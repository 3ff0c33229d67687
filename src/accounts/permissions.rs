//! Capability checks.
//!
//! A capability is a named permission grant checked before a privileged
//! action. Superusers hold every capability implicitly; everyone else
//! needs an explicit grant.

use crate::accounts::User;
use std::collections::HashSet;
use std::sync::RwLock;

/// The capability required to masquerade as another user.
pub const MASQUERADE: &str = "accounts.masquerade";

/// Capability-set interface consulted before privileged actions.
pub trait PermissionChecker: Send + Sync {
    /// Whether the user holds the named capability.
    fn has_capability(&self, user: &User, capability: &str) -> bool;
}

/// Default checker backed by explicit `(user id, capability)` grants.
#[derive(Default)]
pub struct CapabilitySet {
    grants: RwLock<HashSet<(String, String)>>,
}

impl CapabilitySet {
    /// Create an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability to a user.
    pub fn grant(&self, user_id: impl Into<String>, capability: impl Into<String>) {
        self.grants
            .write()
            .expect("capability set lock poisoned")
            .insert((user_id.into(), capability.into()));
    }

    /// Revoke a previously granted capability.
    pub fn revoke(&self, user_id: &str, capability: &str) {
        self.grants
            .write()
            .expect("capability set lock poisoned")
            .remove(&(user_id.to_string(), capability.to_string()));
    }
}

impl PermissionChecker for CapabilitySet {
    fn has_capability(&self, user: &User, capability: &str) -> bool {
        if user.is_superuser {
            return true;
        }
        self.grants
            .read()
            .expect("capability set lock poisoned")
            .contains(&(user.id.clone(), capability.to_string()))
    }
}
