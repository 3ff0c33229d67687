//! Account data model: users, companies, lookup, and capabilities.

mod company;
mod directory;
mod permissions;
mod user;

pub use company::Company;
pub use directory::{Directory, InMemoryDirectory};
pub use permissions::{CapabilitySet, PermissionChecker, MASQUERADE};
pub use user::{random_password, User, DEFAULT_USER_TIMEZONE};
