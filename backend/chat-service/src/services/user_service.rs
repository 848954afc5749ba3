use crate::models::{User, UserInfo};
use crate::repository::{RepositoryError, UserRepository};
use crate::security::password::{self, PasswordError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("username must be between 4 and 20 characters")]
    UsernameLength,
    #[error("username must start with a letter")]
    UsernameStart,
    #[error("username can only contain letters, numbers, and underscores")]
    UsernameContains,
    #[error("username already exists")]
    UsernameAlreadyExists,

    #[error("password must be at least 8 characters long")]
    PasswordLength,
    #[error("password must contain at least one uppercase letter")]
    PasswordUppercase,
    #[error("password must contain at least one lowercase letter")]
    PasswordLowercase,
    #[error("password must contain at least one digit")]
    PasswordDigit,
    #[error("password must contain at least one special character")]
    PasswordSpecial,

    #[error("user not found")]
    UserNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
    #[error("password hashing error: {0}")]
    Password(#[from] PasswordError),
    #[error("token error: {0}")]
    Token(anyhow::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UserError {
    /// Rule violations the client can fix by changing the input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UserError::UsernameLength
                | UserError::UsernameStart
                | UserError::UsernameContains
                | UserError::PasswordLength
                | UserError::PasswordUppercase
                | UserError::PasswordLowercase
                | UserError::PasswordDigit
                | UserError::PasswordSpecial
        )
    }
}

pub fn validate_username(username: &str) -> Result<(), UserError> {
    let len = username.chars().count();
    if !(4..=20).contains(&len) {
        return Err(UserError::UsernameLength);
    }
    if !username.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(UserError::UsernameStart);
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(UserError::UsernameContains);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), UserError> {
    if password.chars().count() < 8 {
        return Err(UserError::PasswordLength);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(UserError::PasswordUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(UserError::PasswordLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(UserError::PasswordDigit);
    }
    // Anything outside [A-Za-z0-9] counts, underscore included
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return Err(UserError::PasswordSpecial);
    }
    Ok(())
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Create an account. Rules are checked username first, then
    /// availability, then password strength.
    pub async fn register(&self, username: &str, password: &str) -> Result<UserInfo, UserError> {
        validate_username(username)?;
        if self.repo.find_by_username(username).await?.is_some() {
            return Err(UserError::UsernameAlreadyExists);
        }
        validate_password(password)?;

        // Argon2 blocks for tens of milliseconds
        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&owned))
            .await??;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            created_at: chrono::Utc::now(),
        };

        // HSETNX decides races between concurrent registrations
        if !self.repo.create(&user).await? {
            return Err(UserError::UsernameAlreadyExists);
        }

        tracing::info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user.info())
    }

    /// Verify credentials and issue a signed token
    pub async fn login(&self, username: &str, password: &str) -> Result<String, UserError> {
        let user = self
            .repo
            .find_by_username(username)
            .await?
            .ok_or(UserError::UserNotFound)?;

        let candidate = password.to_string();
        let hash = user.password_hash.clone();
        let matches =
            tokio::task::spawn_blocking(move || password::verify_password(&candidate, &hash))
                .await??;
        if !matches {
            return Err(UserError::InvalidCredentials);
        }

        crypto_core::jwt::generate_token(user.id, &user.username).map_err(UserError::Token)
    }
}
