use super::{ChatRepository, RepositoryError, TailBatch, TailOptions, UserRepository};
use crate::models::{Message, MessageId, NewMessage, TopicKey, User};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{Notify, RwLock};
use tokio::time::{timeout_at, Instant};

#[derive(Default)]
struct MemoryLog {
    topics: HashMap<String, Vec<Message>>,
    last_id: MessageId,
}

impl MemoryLog {
    /// Same shape as Redis: wall-clock millis, sequence within a millisecond,
    /// never going backwards even if the clock does.
    fn next_id(&mut self) -> MessageId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now > self.last_id.millis {
            MessageId::new(now, 0)
        } else {
            MessageId::new(self.last_id.millis, self.last_id.seq + 1)
        };
        self.last_id = id;
        id
    }

    fn after(&self, key: &str, cursor: MessageId, limit: usize) -> Vec<Message> {
        self.topics
            .get(key)
            .map(|log| {
                let start = log.partition_point(|m| m.id <= cursor);
                log[start..].iter().take(limit).cloned().collect()
            })
            .unwrap_or_default()
    }
}

/// In-process chat log with the same ordering and tailing semantics as the
/// Redis implementation
pub struct MemoryChatRepository {
    log: Mutex<MemoryLog>,
    appended: Notify,
    tail: TailOptions,
}

impl MemoryChatRepository {
    pub fn new(tail: TailOptions) -> Self {
        Self {
            log: Mutex::new(MemoryLog::default()),
            appended: Notify::new(),
            tail,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryLog> {
        // A panic while holding the lock cannot leave the log half-written
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryChatRepository {
    fn default() -> Self {
        Self::new(TailOptions::default())
    }
}

#[async_trait]
impl ChatRepository for MemoryChatRepository {
    async fn append(
        &self,
        topic: &TopicKey,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let stored = {
            let mut log = self.lock();
            let id = log.next_id();
            let stored = message.into_message(id);
            log.topics
                .entry(topic.stream_key())
                .or_default()
                .push(stored.clone());
            stored
        };
        self.appended.notify_waiters();
        Ok(stored)
    }

    async fn tail_after(
        &self,
        topic: &TopicKey,
        cursor: MessageId,
    ) -> Result<TailBatch, RepositoryError> {
        let key = topic.stream_key();
        let deadline = Instant::now() + self.tail.block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed
            notified.as_mut().enable();

            let messages = self.lock().after(&key, cursor, self.tail.batch_size);
            if let Some(last) = messages.last() {
                let cursor = last.id;
                return Ok(TailBatch { messages, cursor });
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Ok(TailBatch::empty(cursor));
            }
        }
    }

    async fn history(
        &self,
        topic: &TopicKey,
        count: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let log = self.lock();
        Ok(log
            .topics
            .get(&topic.stream_key())
            .map(|entries| entries[entries.len().saturating_sub(count)..].to_vec())
            .unwrap_or_default())
    }

    async fn latest_id(&self, topic: &TopicKey) -> Result<Option<MessageId>, RepositoryError> {
        let log = self.lock();
        Ok(log
            .topics
            .get(&topic.stream_key())
            .and_then(|entries| entries.last())
            .map(|m| m.id))
    }
}

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: &User) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Ok(false);
        }
        users.insert(user.username.clone(), user.clone());
        Ok(true)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(username).cloned())
    }
}
