//! Display-language resolution.
//!
//! The effective language for one request comes from an explicit
//! `?lang` override, then the authenticated user's stored preference,
//! then the configured default. Values outside the supported set fall
//! back to the default.

use crate::accounts::User;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Language configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Language codes the deployment supports.
    #[serde(default = "default_supported")]
    pub supported: Vec<String>,
    /// Fallback language code.
    #[serde(default = "default_language")]
    pub default: String,
}

fn default_supported() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            supported: default_supported(),
            default: default_language(),
        }
    }
}

impl LanguageConfig {
    /// Whether the code is one of the supported languages.
    #[must_use]
    pub fn is_supported(&self, code: &str) -> bool {
        self.supported.iter().any(|s| s == code)
    }
}

/// The display language in effect for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLanguage(pub String);

impl RequestLanguage {
    /// Resolve the effective language for a request.
    #[must_use]
    pub fn resolve(explicit: Option<&str>, user: Option<&User>, config: &LanguageConfig) -> Self {
        let candidate = explicit
            .or_else(|| user.and_then(|u| u.preferred_language.as_deref()))
            .unwrap_or(&config.default);

        if config.is_supported(candidate) {
            Self(candidate.to_string())
        } else {
            Self(config.default.clone())
        }
    }
}

thread_local! {
    static LANGUAGE_OVERRIDE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Run a closure with the thread's language temporarily overridden.
///
/// Used when rendering content in another user's language (for example
/// an email to a user with a different preference). The previous value
/// is restored when the closure returns, including on panic unwind.
pub fn with_language<R>(lang: &str, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<String>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            LANGUAGE_OVERRIDE.with(|current| *current.borrow_mut() = previous);
        }
    }

    let previous = LANGUAGE_OVERRIDE.with(|current| {
        current.borrow_mut().replace(lang.to_string())
    });
    let _restore = Restore(previous);
    f()
}

/// The thread's language override, if one is active.
#[must_use]
pub fn language_override() -> Option<String> {
    LANGUAGE_OVERRIDE.with(|current| current.borrow().clone())
}
