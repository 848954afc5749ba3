//! Log consumer: tails the chat log and republishes new entries to the hub.
//!
//! One listener per process. It starts at the newest entry present at
//! startup, so history is served by backfill and never replayed live.

use crate::metrics::{MESSAGES_BROADCAST_TOTAL, TAIL_ERRORS_TOTAL};
use crate::models::{MessageId, TopicKey};
use crate::repository::{ChatRepository, RepositoryError};
use crate::websocket::hub::Hub;
use crate::websocket::message_types::WsEnvelope;
use std::sync::Arc;
use tokio::time::{self, Duration};

/// Delay before retrying a failed log read
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct ChatListener {
    repo: Arc<dyn ChatRepository>,
    hub: Hub,
    topic: TopicKey,
    retry_delay: Duration,
    cursor: MessageId,
}

impl ChatListener {
    pub fn new(repo: Arc<dyn ChatRepository>, hub: Hub) -> Self {
        Self {
            repo,
            hub,
            topic: TopicKey::Chatroom,
            retry_delay: DEFAULT_RETRY_DELAY,
            cursor: MessageId::ZERO,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn cursor(&self) -> MessageId {
        self.cursor
    }

    /// Position the cursor at the newest entry, `0-0` for an empty log.
    /// Retries until the store answers.
    pub async fn resolve_start(&mut self) {
        loop {
            match self.repo.latest_id(&self.topic).await {
                Ok(latest) => {
                    self.cursor = latest.unwrap_or(MessageId::ZERO);
                    tracing::info!(cursor = %self.cursor, topic = %self.topic, "chat listener positioned");
                    return;
                }
                Err(e) => {
                    TAIL_ERRORS_TOTAL.inc();
                    tracing::warn!(error = %e, "failed to read newest log id, retrying");
                    time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// One blocking tail. Returns how many envelopes were broadcast.
    /// On error the cursor is left where it was.
    pub async fn poll_once(&mut self) -> Result<usize, RepositoryError> {
        let batch = self.repo.tail_after(&self.topic, self.cursor).await?;

        let mut sent = 0;
        for message in batch.messages {
            if message.id <= self.cursor {
                continue;
            }
            self.cursor = message.id;
            self.hub.broadcast(WsEnvelope::Chat(message)).await;
            MESSAGES_BROADCAST_TOTAL.inc();
            sent += 1;
        }
        // Skipped undecodable entries still move the cursor forward
        self.cursor = self.cursor.max(batch.cursor);
        Ok(sent)
    }

    /// Position at the newest entry, then follow the log forever.
    pub async fn run(mut self) {
        self.resolve_start().await;
        self.follow().await;
    }

    /// Tail from the current cursor. Never returns; transient failures are
    /// logged and retried without moving the cursor.
    pub async fn follow(mut self) {
        loop {
            if let Err(e) = self.poll_once().await {
                TAIL_ERRORS_TOTAL.inc();
                tracing::error!(error = %e, cursor = %self.cursor, "chat log tail failed");
                time::sleep(self.retry_delay).await;
            }
        }
    }
}
