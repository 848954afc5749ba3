use crate::metrics::MESSAGES_APPENDED_TOTAL;
use crate::models::{Message, NewMessage, TopicKey, UserInfo};
use crate::repository::{ChatRepository, RepositoryError};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No message provided")]
    EmptyContent,

    #[error("Message exceeds the {max} character limit")]
    ContentTooLong { max: usize },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Trim, bound and normalize raw user content.
///
/// The length check runs on the trimmed text before newline collapsing and
/// counts Unicode scalar values, not bytes.
pub fn normalize_content(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::ContentTooLong { max: max_chars });
    }

    let unified = trimmed.replace("\r\n", "\n");
    let mut out = String::with_capacity(unified.len());
    let mut prev_newline = false;
    for c in unified.chars() {
        if c == '\n' {
            if prev_newline {
                continue;
            }
            prev_newline = true;
        } else {
            prev_newline = false;
        }
        out.push(c);
    }
    Ok(out)
}

/// The only path from user input to the chat log.
///
/// Nothing is broadcast from here: the log consumer picks appended entries up
/// from the repository, so a failed append is never seen by anyone.
pub struct MessageService {
    repo: Arc<dyn ChatRepository>,
    max_chars: usize,
}

impl MessageService {
    pub fn new(repo: Arc<dyn ChatRepository>, max_chars: usize) -> Self {
        Self { repo, max_chars }
    }

    pub async fn send_chatroom_message(
        &self,
        sender: &UserInfo,
        raw: &str,
    ) -> Result<Message, ChatError> {
        self.send(TopicKey::Chatroom, sender, raw, None).await
    }

    /// Append to the pair log shared by `sender` and `recipient_id`.
    pub async fn send_direct_message(
        &self,
        sender: &UserInfo,
        recipient_id: &str,
        raw: &str,
    ) -> Result<Message, ChatError> {
        let topic = TopicKey::direct(&sender.id, recipient_id);
        self.send(topic, sender, raw, Some(recipient_id.to_string()))
            .await
    }

    async fn send(
        &self,
        topic: TopicKey,
        sender: &UserInfo,
        raw: &str,
        to: Option<String>,
    ) -> Result<Message, ChatError> {
        let content = normalize_content(raw, self.max_chars)?;
        let message = NewMessage {
            from: sender.id.clone(),
            from_name: sender.username.clone(),
            to,
            content,
        };

        let stored = self.repo.append(&topic, message).await?;
        MESSAGES_APPENDED_TOTAL.inc();
        tracing::debug!(message_id = %stored.id, user_id = %sender.id, topic = %topic, "message appended");
        Ok(stored)
    }

    pub async fn recent_history(&self, limit: usize) -> Result<Vec<Message>, RepositoryError> {
        self.repo.history(&TopicKey::Chatroom, limit).await
    }
}
