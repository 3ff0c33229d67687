//! The company (organization) record.
//!
//! Companies group users and are stamped onto audit events for
//! attribution. They carry a postal address used for display only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named organization owning zero or more users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    /// Unique identifier.
    pub id: String,
    pub name: String,
    pub street_address: String,
    pub street_address_2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Company {
    /// Create a company with the given name and an empty address.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            street_address: String::new(),
            street_address_2: String::new(),
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            created_on: now,
            updated_on: now,
        }
    }

    /// The display address as a list of lines.
    ///
    /// Starts with the company name, then any non-empty street lines,
    /// then `"{city}, {state} {postal}"` when a city is set, or
    /// `"{state} {postal}"` otherwise.
    #[must_use]
    pub fn address_lines(&self) -> Vec<String> {
        let mut lines = vec![self.name.clone()];
        if !self.street_address.is_empty() {
            lines.push(self.street_address.clone());
        }
        if !self.street_address_2.is_empty() {
            lines.push(self.street_address_2.clone());
        }
        if !self.city.is_empty() {
            lines.push(format!(
                "{}, {} {}",
                self.city, self.state, self.postal_code
            ));
        } else {
            lines.push(format!("{} {}", self.state, self.postal_code));
        }
        lines
    }
}

impl std::fmt::Display for Company {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
