//! User and company lookup.
//!
//! The [`Directory`] trait abstracts the persistence layer for account
//! records. Implement it for your database; [`InMemoryDirectory`] is
//! suitable for development and testing.

use crate::accounts::{Company, User};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage operations for account records.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Find a user by their unique ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Find a user by email address (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert or update a user record.
    async fn save_user(&self, user: &User) -> Result<()>;

    /// List all user records.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Find a company by its unique ID.
    async fn company_by_id(&self, id: &str) -> Result<Option<Company>>;

    /// Insert or update a company record.
    async fn save_company(&self, company: &Company) -> Result<()>;

    /// Resolve the company a user belongs to, if any.
    async fn company_of(&self, user: &User) -> Result<Option<Company>> {
        match &user.company_id {
            Some(id) => self.company_by_id(id).await,
            None => Ok(None),
        }
    }
}

/// In-memory directory implementation.
///
/// Records live in a HashMap. Suitable for development and testing, not
/// for production (records are lost on restart).
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<HashMap<String, User>>>,
    companies: Arc<RwLock<HashMap<String, Company>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user and return its ID (test convenience).
    pub async fn add_user(&self, user: User) -> String {
        let id = user.id.clone();
        self.users.write().await.insert(id.clone(), user);
        id
    }

    /// Insert a company and return its ID (test convenience).
    pub async fn add_company(&self, company: Company) -> String {
        let id = company.id.clone();
        self.companies.write().await.insert(id.clone(), company);
        id
    }

    /// Remove a user record entirely (simulates data loss in tests).
    pub async fn remove_user(&self, id: &str) {
        self.users.write().await.remove(id);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let needle = email.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == needle)
            .cloned())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn company_by_id(&self, id: &str) -> Result<Option<Company>> {
        Ok(self.companies.read().await.get(id).cloned())
    }

    async fn save_company(&self, company: &Company) -> Result<()> {
        self.companies
            .write()
            .await
            .insert(company.id.clone(), company.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_email_is_case_insensitive() {
        let directory = InMemoryDirectory::new();
        directory
            .add_user(User::new("alice@example.com", "Alice", "Smith"))
            .await;

        let found = directory.find_by_email("ALICE@Example.com").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let directory = InMemoryDirectory::new();
        assert!(directory.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_company_of() {
        let directory = InMemoryDirectory::new();
        let company_id = directory.add_company(Company::new("Acme")).await;
        let user_id = directory
            .add_user(User::new("a@example.com", "A", "B").with_company(&company_id))
            .await;

        let user = directory.find_by_id(&user_id).await.unwrap().unwrap();
        let company = directory.company_of(&user).await.unwrap().unwrap();
        assert_eq!(company.name, "Acme");
    }

    #[tokio::test]
    async fn test_save_user_updates_in_place() {
        let directory = InMemoryDirectory::new();
        let id = directory
            .add_user(User::new("a@example.com", "A", "B"))
            .await;

        let mut user = directory.find_by_id(&id).await.unwrap().unwrap();
        user.is_active = false;
        directory.save_user(&user).await.unwrap();

        let reloaded = directory.find_by_id(&id).await.unwrap().unwrap();
        assert!(!reloaded.is_active);
    }
}
