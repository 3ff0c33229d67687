//! Timezone-per-request resolution.
//!
//! The effective display timezone is a per-request value, never a
//! process-wide setting: middleware resolves it from the authenticated
//! user's stored preference (falling back to the configured default)
//! and threads it through the request as an extension. It is read-only
//! with respect to the user record and dropped with the request, so one
//! user's timezone can never leak into another's response on a shared
//! worker.

use crate::accounts::User;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Timezone configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimezoneConfig {
    /// System default when a user has no stored preference.
    #[serde(default = "default_timezone")]
    pub default: Tz,
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            default: default_timezone(),
        }
    }
}

/// The display timezone in effect for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimezone(pub Tz);

impl RequestTimezone {
    /// Resolve the effective timezone for a request.
    ///
    /// An authenticated user with a stored preference gets that
    /// preference; everything else gets the configured default.
    #[must_use]
    pub fn resolve(user: Option<&User>, config: &TimezoneConfig) -> Self {
        let tz = user.and_then(|u| u.timezone).unwrap_or(config.default);
        Self(tz)
    }
}

impl std::ops::Deref for RequestTimezone {
    type Target = Tz;

    fn deref(&self) -> &Tz {
        &self.0
    }
}

/// Extract the request timezone inserted by the preferences middleware.
///
/// Falls back to UTC when the middleware is not installed.
impl<S> FromRequestParts<S> for RequestTimezone
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestTimezone>()
            .copied()
            .unwrap_or(RequestTimezone(chrono_tz::UTC)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_user_preference_wins() {
        let mut user = User::new("a@example.com", "A", "B");
        user.timezone = Some(chrono_tz::Europe::London);

        let resolved = RequestTimezone::resolve(Some(&user), &TimezoneConfig::default());
        assert_eq!(resolved.0, chrono_tz::Europe::London);
    }

    #[test]
    fn test_missing_preference_falls_back_to_default() {
        let mut user = User::new("a@example.com", "A", "B");
        user.timezone = None;

        let config = TimezoneConfig {
            default: chrono_tz::Australia::Sydney,
        };
        let resolved = RequestTimezone::resolve(Some(&user), &config);
        assert_eq!(resolved.0, chrono_tz::Australia::Sydney);
    }

    #[test]
    fn test_anonymous_request_gets_default() {
        let resolved = RequestTimezone::resolve(None, &TimezoneConfig::default());
        assert_eq!(resolved.0, chrono_tz::UTC);
    }

    #[test]
    fn test_new_user_defaults_to_eastern() {
        let user = User::new("a@example.com", "A", "B");
        let resolved = RequestTimezone::resolve(Some(&user), &TimezoneConfig::default());
        assert_eq!(resolved.0, chrono_tz::America::New_York);
    }
}
