//! Password hashing and verification using Argon2id
use argon2::{
    password_hash::{self, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(password_hash::Error),

    #[error("invalid password hash format: {0}")]
    InvalidHash(password_hash::Error),
}

/// Hash a password; the PHC string embeds salt and parameters
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(rand::thread_rng());

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(PasswordError::Hash)
}

/// Check a password against a stored hash.
///
/// `Ok(false)` is a mismatch; `Err` means the stored hash itself is unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(PasswordError::InvalidHash)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::InvalidHash(e)),
    }
}
