//! The user (principal) record.
//!
//! Users sign in with their email address, which is unique and compared
//! case-insensitively at authentication time. The stored record is never
//! mutated by the masquerade protocol; masquerading only changes which
//! principal a session represents.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default timezone assigned to new users.
pub const DEFAULT_USER_TIMEZONE: Tz = chrono_tz::America::New_York;

/// An authenticable identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique identifier.
    pub id: String,
    /// Login identifier; globally unique, stored normalized to lowercase.
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Inactive users cannot authenticate.
    pub is_active: bool,
    /// Staff users can access the admin surface.
    pub is_staff: bool,
    /// Superusers implicitly hold every capability.
    pub is_superuser: bool,
    /// Owning company, if any.
    pub company_id: Option<String>,
    /// Preferred display timezone; `None` falls back to the system default.
    pub timezone: Option<Tz>,
    /// Preferred display language code (e.g. "en").
    pub preferred_language: Option<String>,
    /// PHC-formatted password hash.
    pub password_hash: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new regular user with default flags.
    ///
    /// The email is normalized to lowercase. The password hash starts
    /// empty; set it through the credential flows.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into().to_lowercase(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            company_id: None,
            timezone: Some(DEFAULT_USER_TIMEZONE),
            preferred_language: None,
            password_hash: String::new(),
            created_on: now,
            updated_on: now,
            last_login: None,
        }
    }

    /// Mark this user as staff.
    #[must_use]
    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }

    /// Mark this user as a superuser (implies staff).
    #[must_use]
    pub fn superuser(mut self) -> Self {
        self.is_staff = true;
        self.is_superuser = true;
        self
    }

    /// Attach the user to a company.
    #[must_use]
    pub fn with_company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    /// The first and last name joined with a space, falling back to the
    /// email when both are empty.
    #[must_use]
    pub fn full_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_str(), self.last_name.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }

    /// The short display name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.first_name
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Generate a random password suitable for admin-initiated resets.
///
/// The result always satisfies the complex password policy.
#[must_use]
pub fn random_password() -> String {
    // Two UUIDs give plenty of entropy; the fixed suffix guarantees the
    // required character classes.
    let body = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    format!("aA1${body}")
}
