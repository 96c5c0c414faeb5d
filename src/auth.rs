//! Password handling
//!
//! Passwords are hashed with Argon2id using a random salt per hash.
//! Generated passwords (bulk import) come from UUID v4 randomness.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::store::error::{StoreError, StoreResult};

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Length of generated passwords
const GENERATED_PASSWORD_LENGTH: usize = 12;

/// Reject passwords that are too short
pub fn validate_password(password: &str) -> StoreResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(StoreError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> StoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| StoreError::PasswordHash)
}

/// Check a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id hash with default parameters that matches no password
///
/// Checked on logins for unknown emails so they cost the same as a wrong password.
const UNKNOWN_USER_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Check a password against a stored hash, or against a decoy when there is none
pub fn verify_password_or_decoy(password: &str, hash: Option<&str>) -> bool {
    let matched = verify_password(password, hash.unwrap_or(UNKNOWN_USER_HASH));
    matched && hash.is_some()
}

/// Random password handed out once to imported users
pub fn generate_password() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(GENERATED_PASSWORD_LENGTH)
        .collect()
}

/// Opaque bearer token for a new session
pub fn generate_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_verify_garbage_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn test_generated_values() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LENGTH);
        assert!(validate_password(&password).is_ok());

        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_decoy_hash_runs_argon2_and_never_matches() {
        let parsed = PasswordHash::new(UNKNOWN_USER_HASH).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");

        assert!(!verify_password_or_decoy("anything", None));
        assert!(!verify_password_or_decoy("", None));

        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password_or_decoy("correct horse", Some(&hash)));
        assert!(!verify_password_or_decoy("wrong horse", Some(&hash)));
    }
}
