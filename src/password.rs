//! Password hashing and the complex password policy.
//!
//! Hashing uses Argon2id. The policy is a stateless predicate over a
//! candidate password, with a human-readable requirement string for
//! forms.

use crate::error::{QuarterdeckError, Result};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as Argon2Hasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Configuration for password hashing.
#[derive(Clone, Debug)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 19456 = 19MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 1)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // OWASP recommended minimum for Argon2id
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl PasswordConfig {
    /// Faster settings for development/testing (NOT for production).
    #[cfg(any(test, debug_assertions))]
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Handles password hashing and verification using Argon2id.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    config: PasswordConfig,
}

impl PasswordHasher {
    /// Create a new password hasher with the given configuration.
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    /// Hash a password, returning the PHC-formatted hash string.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = self.build_argon2()?;

        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| QuarterdeckError::internal(format!("Password hashing failed: {e}")))
    }

    /// Verify a password against a stored hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| QuarterdeckError::internal(format!("Invalid password hash format: {e}")))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn build_argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.config.memory_cost,
            self.config.time_cost,
            self.config.parallelism,
            None,
        )
        .map_err(|e| QuarterdeckError::internal(format!("Invalid Argon2 params: {e}")))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Punctuation characters the policy accepts.
const PUNCTUATION: &[char] = &['$', '@', '!', '%', '*', '?', '&'];

/// Complex password policy.
///
/// A candidate must contain at least one lowercase letter, one uppercase
/// letter, one digit, and one of `$ @ ! % * ? &`, and its first
/// character must come from that same alphabet (letters, digits, or the
/// punctuation set). No length requirement is enforced here.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComplexPasswordPolicy;

impl ComplexPasswordPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Whether the candidate satisfies the policy.
    #[must_use]
    pub fn is_acceptable(&self, candidate: &str) -> bool {
        let Some(first) = candidate.chars().next() else {
            return false;
        };
        // only the first character is position-constrained
        if !first.is_ascii_alphanumeric() && !PUNCTUATION.contains(&first) {
            return false;
        }

        candidate.chars().any(|c| c.is_ascii_lowercase())
            && candidate.chars().any(|c| c.is_ascii_uppercase())
            && candidate.chars().any(|c| c.is_ascii_digit())
            && candidate.chars().any(|c| PUNCTUATION.contains(&c))
    }

    /// Human-readable requirement string for forms and error messages.
    #[must_use]
    pub fn requirement(&self) -> &'static str {
        "Password should contain capital and small letters, numeric values and one of the following $@$!%*?&"
    }

    /// Validate, returning a `BadRequest` carrying the requirement text.
    pub fn check(&self, candidate: &str) -> Result<()> {
        if self.is_acceptable(candidate) {
            Ok(())
        } else {
            Err(QuarterdeckError::bad_request(self.requirement()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::new(PasswordConfig::fast())
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("aab1234AAAA$#").unwrap();

        assert!(hasher.verify("aab1234AAAA$#", &hash).unwrap());
        assert!(!hasher.verify("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = fast_hasher();
        let hash1 = hasher.hash("same-password").unwrap();
        let hash2 = hasher.hash("same-password").unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_password_missing_special_char() {
        assert!(!ComplexPasswordPolicy::new().is_acceptable("aab1234AAAA"));
    }

    #[test]
    fn test_password_missing_numeric() {
        assert!(!ComplexPasswordPolicy::new().is_acceptable("aab$$$$AAAA"));
    }

    #[test]
    fn test_password_missing_lower() {
        assert!(!ComplexPasswordPolicy::new().is_acceptable("$$$$1234AAAA"));
    }

    #[test]
    fn test_password_missing_upper() {
        assert!(!ComplexPasswordPolicy::new().is_acceptable("aab1234$$$$"));
    }

    #[test]
    fn test_good_password() {
        assert!(ComplexPasswordPolicy::new().is_acceptable("aab1234AAAA$#"));
    }

    #[test]
    fn test_empty_password() {
        assert!(!ComplexPasswordPolicy::new().is_acceptable(""));
    }

    #[test]
    fn test_first_character_must_be_in_alphabet() {
        // identical body, shifted so a disallowed character leads
        assert!(!ComplexPasswordPolicy::new().is_acceptable("#aab1234AAAA$"));
        assert!(ComplexPasswordPolicy::new().is_acceptable("$aab1234AAAA"));
    }

    #[test]
    fn test_no_length_requirement() {
        assert!(ComplexPasswordPolicy::new().is_acceptable("aA1$"));
    }

    #[test]
    fn test_check_carries_requirement_text() {
        let err = ComplexPasswordPolicy::new().check("weak").unwrap_err();
        assert!(err.to_string().contains("capital and small letters"));
    }
}
