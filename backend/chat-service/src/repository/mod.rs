//! Storage collaborators: the append-only chat log and the account store.
//!
//! The Redis implementations are used in production; the memory ones back
//! local runs (`CHAT_STORE=memory`) and the test suites.

use crate::models::{Message, MessageId, NewMessage, TopicKey, User};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis_streams;

pub use self::memory::{MemoryChatRepository, MemoryUserRepository};
pub use self::redis_streams::{RedisChatRepository, RedisUserRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed entry {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bounds for one blocking tail call
#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    pub block: Duration,
    pub batch_size: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            block: Duration::from_millis(5000),
            batch_size: 100,
        }
    }
}

/// Result of a tail call: the decoded entries and where the next call resumes.
///
/// `cursor` can be past the last element of `messages` when undecodable
/// entries were skipped; it never moves backwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TailBatch {
    pub messages: Vec<Message>,
    pub cursor: MessageId,
}

impl TailBatch {
    pub fn empty(cursor: MessageId) -> Self {
        Self {
            messages: Vec::new(),
            cursor,
        }
    }
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Persist a message; the store assigns id and timestamp.
    async fn append(&self, topic: &TopicKey, message: NewMessage)
        -> Result<Message, RepositoryError>;

    /// Wait (bounded) for entries strictly after `cursor`.
    /// An empty batch with an unchanged cursor means the wait timed out.
    async fn tail_after(
        &self,
        topic: &TopicKey,
        cursor: MessageId,
    ) -> Result<TailBatch, RepositoryError>;

    /// Up to `count` most recent entries, oldest first.
    async fn history(&self, topic: &TopicKey, count: usize)
        -> Result<Vec<Message>, RepositoryError>;

    /// Id of the newest entry, `None` for an empty log.
    async fn latest_id(&self, topic: &TopicKey) -> Result<Option<MessageId>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Store a new account. Returns `false` when the username is taken.
    async fn create(&self, user: &User) -> Result<bool, RepositoryError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
}
