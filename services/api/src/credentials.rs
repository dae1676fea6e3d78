//! services/api/src/credentials.rs
//!
//! Password hashing for user secrets. New secrets are stored as argon2 PHC
//! strings; rows written before hashing was introduced still hold the secret
//! itself and are recognised so they can be upgraded.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use diet_assistant_core::ports::{PortError, PortResult};

/// The outcome of checking a login attempt against a stored secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    Valid,
    /// Matched a plain-text secret; the caller should re-hash it.
    ValidLegacy,
    Invalid,
}

pub fn hash_secret(secret: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PortError::Unexpected(format!("Failed to hash secret: {}", e)))
}

pub fn verify_secret(candidate: &str, stored: &str) -> SecretCheck {
    match PasswordHash::new(stored) {
        Ok(parsed) => {
            if Argon2::default()
                .verify_password(candidate.as_bytes(), &parsed)
                .is_ok()
            {
                SecretCheck::Valid
            } else {
                SecretCheck::Invalid
            }
        }
        // Not a PHC string, so this row predates hashing.
        Err(_) if candidate == stored => SecretCheck::ValidLegacy,
        Err(_) => SecretCheck::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_secret_verifies_and_is_not_plain() {
        let hash = hash_secret("s3cret").unwrap();
        assert_ne!(hash, "s3cret");
        assert!(hash.starts_with("$argon2"));
        assert_eq!(verify_secret("s3cret", &hash), SecretCheck::Valid);
        assert_eq!(verify_secret("wrong", &hash), SecretCheck::Invalid);
    }

    #[test]
    fn same_secret_hashes_differently() {
        assert_ne!(hash_secret("abc").unwrap(), hash_secret("abc").unwrap());
    }

    #[test]
    fn plain_text_rows_are_flagged_as_legacy() {
        assert_eq!(verify_secret("1234", "1234"), SecretCheck::ValidLegacy);
        assert_eq!(verify_secret("1235", "1234"), SecretCheck::Invalid);
    }
}
