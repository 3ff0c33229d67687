//! Quarterdeck - pluggable account management and admin masquerade
//!
//! Quarterdeck is a library of account extensions for Axum applications:
//! a user/company model with capability checks, an admin masquerade
//! (impersonation) protocol, an append-only audit log fed by an explicit
//! event bus, credential flows with lockout/captcha integration, and
//! per-request timezone and language resolution.
//!
//! # Features
//!
//! - **Masquerade**: privileged users can temporarily sign in as another
//!   user, with a full audit trail and strict rules (superusers can
//!   never be impersonated)
//! - **Audit log**: append-only, denormalized records of every
//!   security-relevant account event
//! - **Flows**: sign in/out, password change, and password-reset
//!   requests, firing events on the in-process bus
//! - **Policies**: complex password validation and login lockout with
//!   captcha-verified reset
//! - **Request context**: per-request display timezone and language
//!   threaded through as extensions, never process-global
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quarterdeck::{
//!     accounts::{CapabilitySet, InMemoryDirectory},
//!     audit::InMemoryAuditStore,
//!     lockout::{AlwaysValidCaptcha, InMemoryLockoutStore},
//!     mailer::ConsoleMailer,
//!     password::PasswordHasher,
//!     routes::{router, AppContext},
//!     session::InMemorySessionStore,
//!     ConfigBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     quarterdeck::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build();
//!     let ctx = AppContext::new(
//!         config,
//!         Arc::new(InMemoryDirectory::new()),
//!         Arc::new(InMemorySessionStore::new()),
//!         Arc::new(InMemoryAuditStore::new()),
//!         Arc::new(CapabilitySet::new()),
//!         Arc::new(InMemoryLockoutStore::new()),
//!         Arc::new(ConsoleMailer),
//!         Arc::new(AlwaysValidCaptcha),
//!         PasswordHasher::default(),
//!     );
//!
//!     let app = router(ctx);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod accounts;
pub mod admin;
pub mod audit;
mod config;
mod error;
pub mod events;
pub mod flows;
pub mod language;
pub mod lockout;
pub mod mailer;
pub mod masquerade;
pub mod password;
pub mod routes;
pub mod session;
pub mod timezone;

// Re-exports for the public API
pub use config::{Config, ConfigBuilder};
pub use error::{QuarterdeckError, Result};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults.
///
/// Call this early, typically in `main()` before wiring the extension.
///
/// # Environment Variables
///
/// - `RUST_LOG`: set the log level (e.g. "info", "quarterdeck=debug")
/// - `QUARTERDECK_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("QUARTERDECK_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
