use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with Argon2id and a random salt (PHC string).
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut PHOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| ApiError::Internal(format!("argon2 hash error: {e}")))
}

/// Unparseable stored hashes never verify.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.trim().chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// An opaque bearer token handed to the client. Only `hash` is persisted.
pub struct IssuedToken {
    pub token: String,
    pub hash: String,
}

impl IssuedToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let hash = hash_access_token(&token);
        Self { token, hash }
    }
}

/// SHA-256 hex of a bearer token, the form stored in `session_token`.
pub fn hash_access_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let phc = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &phc));
        assert!(!verify_password("wrong horse", &phc));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("   seven  ").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn issued_tokens_are_unique_and_hashed() {
        let a = IssuedToken::generate();
        let b = IssuedToken::generate();
        assert_ne!(a.token, b.token);
        assert_eq!(a.hash, hash_access_token(&a.token));
        assert_eq!(a.hash.len(), 64);
        assert!(!a.token.contains('='));
    }
}
