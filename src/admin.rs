//! Administrative account actions.
//!
//! The service layer behind the admin panel: create users, flip the
//! active flag, change emails, rename companies, and send password
//! resets in bulk. Every state change fires its event so the audit log
//! records who did what. Rendering the panel itself is the host
//! application's concern.

use crate::accounts::{Company, Directory, User};
use crate::error::{QuarterdeckError, Result};
use crate::events::{AccountEvent, EventBus};
use crate::flows::AccountFlows;
use crate::password::{ComplexPasswordPolicy, PasswordHasher};
use crate::session::AuthSession;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Parameters for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Administrative actions over account records.
pub struct AdminActions {
    directory: Arc<dyn Directory>,
    events: Arc<EventBus>,
    flows: Arc<AccountFlows>,
    hasher: PasswordHasher,
    policy: ComplexPasswordPolicy,
}

impl AdminActions {
    pub fn new(
        directory: Arc<dyn Directory>,
        events: Arc<EventBus>,
        flows: Arc<AccountFlows>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            directory,
            events,
            flows,
            hasher,
            policy: ComplexPasswordPolicy::new(),
        }
    }

    fn require_staff(actor: &User) -> Result<()> {
        if actor.is_staff {
            Ok(())
        } else {
            Err(QuarterdeckError::forbidden(
                "Admin actions require a staff account",
            ))
        }
    }

    /// Superusers are invisible to and untouchable by non-superuser
    /// admins.
    fn require_reachable(actor: &User, subject: &User) -> Result<()> {
        if subject.is_superuser && !actor.is_superuser {
            Err(QuarterdeckError::not_found("Unknown user"))
        } else {
            Ok(())
        }
    }

    /// Create a user and fire `UserCreated`.
    ///
    /// Only superusers can mint superusers; the password must satisfy
    /// the complex policy; the email must be unused.
    pub async fn create_user(
        &self,
        session: &AuthSession,
        actor: &User,
        new_user: NewUser,
    ) -> Result<User> {
        Self::require_staff(actor)?;
        if new_user.is_superuser && !actor.is_superuser {
            return Err(QuarterdeckError::forbidden(
                "Only a superuser can create a superuser",
            ));
        }
        self.policy.check(&new_user.password)?;

        let email = new_user.email.to_lowercase();
        if self.directory.find_by_email(&email).await?.is_some() {
            return Err(QuarterdeckError::bad_request(format!(
                "A user with email {email} already exists"
            )));
        }

        let mut user = User::new(email, new_user.first_name, new_user.last_name);
        user.company_id = new_user.company_id;
        user.is_staff = new_user.is_staff || new_user.is_superuser;
        user.is_superuser = new_user.is_superuser;
        user.password_hash = self.hasher.hash(&new_user.password)?;
        self.directory.save_user(&user).await?;

        self.events
            .dispatch(
                &AccountEvent::UserCreated {
                    actor: actor.clone(),
                    user: user.clone(),
                },
                session,
            )
            .await?;
        Ok(user)
    }

    /// Set the active flag, firing `UserActivated`/`UserDeactivated`
    /// only on an actual transition.
    pub async fn set_active(
        &self,
        session: &AuthSession,
        actor: &User,
        user_id: &str,
        active: bool,
    ) -> Result<User> {
        Self::require_staff(actor)?;
        let mut user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| QuarterdeckError::not_found("Unknown user"))?;
        Self::require_reachable(actor, &user)?;

        if user.is_active == active {
            return Ok(user);
        }

        user.is_active = active;
        user.updated_on = Utc::now();
        self.directory.save_user(&user).await?;

        let event = if active {
            AccountEvent::UserActivated {
                actor: actor.clone(),
                user: user.clone(),
            }
        } else {
            AccountEvent::UserDeactivated {
                actor: actor.clone(),
                user: user.clone(),
            }
        };
        self.events.dispatch(&event, session).await?;
        Ok(user)
    }

    /// Change a user's email, firing `EmailChanged` only when the
    /// address actually changed.
    pub async fn change_email(
        &self,
        session: &AuthSession,
        actor: &User,
        user_id: &str,
        new_email: &str,
    ) -> Result<User> {
        Self::require_staff(actor)?;
        let mut user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| QuarterdeckError::not_found("Unknown user"))?;
        Self::require_reachable(actor, &user)?;

        let new_email = new_email.to_lowercase();
        if user.email == new_email {
            return Ok(user);
        }
        if self.directory.find_by_email(&new_email).await?.is_some() {
            return Err(QuarterdeckError::bad_request(format!(
                "A user with email {new_email} already exists"
            )));
        }

        let old_email = std::mem::replace(&mut user.email, new_email.clone());
        user.updated_on = Utc::now();
        self.directory.save_user(&user).await?;

        self.events
            .dispatch(
                &AccountEvent::EmailChanged {
                    user: user.clone(),
                    old_email,
                    new_email,
                },
                session,
            )
            .await?;
        Ok(user)
    }

    /// Rename a company, firing `CompanyRenamed` only when the name
    /// actually changed.
    pub async fn rename_company(
        &self,
        session: &AuthSession,
        actor: &User,
        company_id: &str,
        new_name: &str,
    ) -> Result<Company> {
        Self::require_staff(actor)?;
        let mut company = self
            .directory
            .company_by_id(company_id)
            .await?
            .ok_or_else(|| QuarterdeckError::not_found("Unknown company"))?;

        if company.name == new_name {
            return Ok(company);
        }

        let old_name = std::mem::replace(&mut company.name, new_name.to_string());
        company.updated_on = Utc::now();
        self.directory.save_company(&company).await?;

        self.events
            .dispatch(
                &AccountEvent::CompanyRenamed {
                    actor: actor.clone(),
                    company_id: company.id.clone(),
                    old_name,
                    new_name: new_name.to_string(),
                },
                session,
            )
            .await?;
        Ok(company)
    }

    /// Bulk action: send a password-reset email to each selected user,
    /// firing `PasswordResetRequested` per user. Returns how many were
    /// processed.
    pub async fn reset_passwords(
        &self,
        session: &AuthSession,
        actor: &User,
        user_ids: &[String],
    ) -> Result<usize> {
        Self::require_staff(actor)?;

        let mut sent = 0;
        for user_id in user_ids {
            let user = self
                .directory
                .find_by_id(user_id)
                .await?
                .ok_or_else(|| QuarterdeckError::not_found("Unknown user"))?;
            Self::require_reachable(actor, &user)?;

            self.flows.send_reset_email(&user).await?;
            self.events
                .dispatch(&AccountEvent::PasswordResetRequested { user }, session)
                .await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// The users the actor may see: non-superuser admins never see
    /// superusers.
    pub async fn visible_users(&self, actor: &User) -> Result<Vec<User>> {
        Self::require_staff(actor)?;
        let mut users = self.directory.list_users().await?;
        if !actor.is_superuser {
            users.retain(|u| !u.is_superuser);
        }
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    /// The masquerade link shown in the admin user listing.
    #[must_use]
    pub fn masquerade_path(user_id: &str) -> String {
        format!("/admin/masquerade/{user_id}/")
    }
}
