//! Login failure lockout with captcha-verified reset.
//!
//! Tracks failed sign-in attempts per username and locks the account
//! for a cooloff window once the failure limit is reached. A locked-out
//! user is sent to the lockout page, where solving a captcha resets the
//! counter. Verifying the captcha itself is an external service behind
//! the [`CaptchaVerifier`] trait.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default failed attempts before lockout.
const DEFAULT_FAILURE_LIMIT: u32 = 3;

/// Default cooloff window (15 minutes).
const DEFAULT_COOLOFF_SECS: u64 = 15 * 60;

/// Lockout policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Whether lockout is enforced at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Failed attempts before the account locks.
    #[serde(default = "default_failure_limit")]
    pub failure_limit: u32,
    /// How long the account stays locked, in seconds.
    #[serde(default = "default_cooloff_secs")]
    pub cooloff_secs: u64,
    /// Where locked-out requests are redirected.
    #[serde(default = "default_lockout_url")]
    pub lockout_url: String,
    /// Template rendered on the lockout page.
    #[serde(default = "default_lockout_template")]
    pub lockout_template: String,
}

fn default_enabled() -> bool {
    true
}

fn default_failure_limit() -> u32 {
    DEFAULT_FAILURE_LIMIT
}

fn default_cooloff_secs() -> u64 {
    DEFAULT_COOLOFF_SECS
}

fn default_lockout_url() -> String {
    "locked/".to_string()
}

fn default_lockout_template() -> String {
    "accounts/locked_out.html".to_string()
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            failure_limit: default_failure_limit(),
            cooloff_secs: default_cooloff_secs(),
            lockout_url: default_lockout_url(),
            lockout_template: default_lockout_template(),
        }
    }
}

impl LockoutPolicy {
    /// The cooloff window as a duration.
    #[must_use]
    pub fn cooloff(&self) -> Duration {
        Duration::from_secs(self.cooloff_secs)
    }
}

/// Failure-count record for one username.
#[derive(Debug, Clone, Copy)]
pub struct FailureRecord {
    pub failures: u32,
    pub last_failure: Instant,
}

/// Storage for failure counters.
#[async_trait]
pub trait LockoutStore: Send + Sync {
    /// Get the failure record for a username.
    async fn get(&self, username: &str) -> Result<Option<FailureRecord>>;

    /// Replace the failure record for a username.
    async fn put(&self, username: &str, record: FailureRecord) -> Result<()>;

    /// Drop the failure record for a username.
    async fn clear(&self, username: &str) -> Result<()>;
}

/// In-memory failure-counter store.
///
/// Suitable for development and testing.
#[derive(Clone, Default)]
pub struct InMemoryLockoutStore {
    records: Arc<RwLock<HashMap<String, FailureRecord>>>,
}

impl InMemoryLockoutStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockoutStore for InMemoryLockoutStore {
    async fn get(&self, username: &str) -> Result<Option<FailureRecord>> {
        Ok(self.records.read().await.get(username).copied())
    }

    async fn put(&self, username: &str, record: FailureRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(username.to_string(), record);
        Ok(())
    }

    async fn clear(&self, username: &str) -> Result<()> {
        self.records.write().await.remove(username);
        Ok(())
    }
}

/// External captcha verification service.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Whether the captcha response is valid.
    async fn verify(&self, response: &str) -> Result<bool>;
}

/// Captcha verifier that accepts everything. For tests and development.
pub struct AlwaysValidCaptcha;

#[async_trait]
impl CaptchaVerifier for AlwaysValidCaptcha {
    async fn verify(&self, _response: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Tracks failures and enforces the lockout policy.
pub struct LockoutTracker {
    store: Arc<dyn LockoutStore>,
    policy: LockoutPolicy,
}

impl LockoutTracker {
    pub fn new(store: Arc<dyn LockoutStore>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Record a failed attempt. Returns true when the account is now
    /// locked.
    pub async fn record_failure(&self, username: &str) -> Result<bool> {
        if !self.policy.enabled {
            return Ok(false);
        }
        let username = username.to_lowercase();

        let failures = match self.store.get(&username).await? {
            // counting restarts once the cooloff window has passed
            Some(record) if record.last_failure.elapsed() < self.policy.cooloff() => {
                record.failures + 1
            }
            _ => 1,
        };

        self.store
            .put(
                &username,
                FailureRecord {
                    failures,
                    last_failure: Instant::now(),
                },
            )
            .await?;

        let locked = failures >= self.policy.failure_limit;
        if locked {
            tracing::warn!(
                target: "accounts.lockout",
                username = %username,
                failures = failures,
                "account locked out"
            );
        }
        Ok(locked)
    }

    /// Whether the username is currently locked out.
    pub async fn is_locked(&self, username: &str) -> Result<bool> {
        if !self.policy.enabled {
            return Ok(false);
        }
        let username = username.to_lowercase();

        match self.store.get(&username).await? {
            Some(record) => Ok(record.failures >= self.policy.failure_limit
                && record.last_failure.elapsed() < self.policy.cooloff()),
            None => Ok(false),
        }
    }

    /// Clear the failure counter for a username.
    pub async fn reset(&self, username: &str) -> Result<()> {
        self.store.clear(&username.to_lowercase()).await
    }

    /// Captcha-verified unlock, as used by the lockout page.
    ///
    /// Returns true when the captcha was accepted and the counter
    /// cleared.
    pub async fn unlock(
        &self,
        captcha: &dyn CaptchaVerifier,
        username: &str,
        captcha_response: &str,
    ) -> Result<bool> {
        if captcha.verify(captcha_response).await? {
            self.reset(username).await?;
            tracing::info!(
                target: "accounts.lockout",
                username = %username.to_lowercase(),
                "lockout reset after captcha"
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
