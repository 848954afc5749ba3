use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public identity of a user, as attached to sessions and sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
}

impl From<actix_middleware::AuthUser> for UserInfo {
    fn from(user: actix_middleware::AuthUser) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username,
        }
    }
}

/// Stored account record. The password hash never leaves the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.to_string(),
            username: self.username.clone(),
        }
    }
}
