use super::{ChatRepository, RepositoryError, TailBatch, TailOptions, UserRepository};
use crate::models::{Message, MessageId, NewMessage, TopicKey, User};
use crate::redis_client::RedisClient;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;

const USERS_KEY: &str = "users";

/// Chat log on Redis Streams, one stream per topic key.
///
/// Entries carry `from`, `fromName`, optional `to` and `content`; the entry id
/// assigned by `XADD *` is the message id and timestamp.
pub struct RedisChatRepository {
    redis: RedisClient,
    // XREAD BLOCK holds its connection for up to `tail.block`
    tail_conn: Mutex<ConnectionManager>,
    tail: TailOptions,
}

impl RedisChatRepository {
    pub async fn new(redis: RedisClient, tail: TailOptions) -> Result<Self, RepositoryError> {
        let tail_conn = redis.dedicated().await?;
        Ok(Self {
            redis,
            tail_conn: Mutex::new(tail_conn),
            tail,
        })
    }
}

fn field(entry: &StreamId, name: &str) -> Result<String, RepositoryError> {
    entry.get::<String>(name).ok_or_else(|| RepositoryError::Malformed {
        id: entry.id.clone(),
        reason: format!("missing field {name}"),
    })
}

fn parse_id(raw: &str) -> Result<MessageId, RepositoryError> {
    raw.parse().map_err(|e: crate::models::message::ParseMessageIdError| {
        RepositoryError::Malformed {
            id: raw.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Decode one stream entry into a message
pub(crate) fn decode_entry(entry: &StreamId) -> Result<Message, RepositoryError> {
    let id = parse_id(&entry.id)?;
    let to = entry.get::<String>("to").filter(|t| !t.is_empty());

    Ok(NewMessage {
        from: field(entry, "from")?,
        from_name: field(entry, "fromName")?,
        to,
        content: field(entry, "content")?,
    }
    .into_message(id))
}

/// Decode a page of entries, skipping (and logging) the ones that do not parse.
fn decode_entries<'a>(entries: impl IntoIterator<Item = &'a StreamId>) -> Vec<Message> {
    entries
        .into_iter()
        .filter_map(|entry| match decode_entry(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "skipping malformed stream entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ChatRepository for RedisChatRepository {
    async fn append(
        &self,
        topic: &TopicKey,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mut fields: Vec<(&str, &str)> = vec![
            ("from", message.from.as_str()),
            ("fromName", message.from_name.as_str()),
        ];
        if let Some(to) = message.to.as_deref() {
            fields.push(("to", to));
        }
        fields.push(("content", message.content.as_str()));

        let mut conn = self.redis.manager();
        let entry_id = conn
            .xadd::<_, _, _, _, String>(topic.stream_key(), "*", fields.as_slice())
            .await?;
        let id = parse_id(&entry_id)?;

        Ok(message.into_message(id))
    }

    async fn tail_after(
        &self,
        topic: &TopicKey,
        cursor: MessageId,
    ) -> Result<TailBatch, RepositoryError> {
        let key = topic.stream_key();
        let options = StreamReadOptions::default()
            .block(self.tail.block.as_millis() as usize)
            .count(self.tail.batch_size);

        let reply: Option<StreamReadReply> = {
            let mut conn = self.tail_conn.lock().await;
            conn.xread_options(&[key.as_str()], &[cursor.to_string()], &options)
                .await?
        };

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        let next = entries
            .iter()
            .rev()
            .find_map(|e| e.id.parse::<MessageId>().ok())
            .map_or(cursor, |last| last.max(cursor));

        Ok(TailBatch {
            messages: decode_entries(&entries),
            cursor: next,
        })
    }

    async fn history(
        &self,
        topic: &TopicKey,
        count: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.manager();
        let reply: StreamRangeReply = conn
            .xrevrange_count(topic.stream_key(), "+", "-", count)
            .await?;

        let mut messages = decode_entries(&reply.ids);
        messages.reverse();
        Ok(messages)
    }

    async fn latest_id(&self, topic: &TopicKey) -> Result<Option<MessageId>, RepositoryError> {
        let mut conn = self.redis.manager();
        let reply: StreamRangeReply = conn
            .xrevrange_count(topic.stream_key(), "+", "-", 1)
            .await?;

        reply.ids.first().map(|e| parse_id(&e.id)).transpose()
    }
}

/// Accounts stored as JSON in the `users` hash, keyed by username
pub struct RedisUserRepository {
    redis: RedisClient,
}

impl RedisUserRepository {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl UserRepository for RedisUserRepository {
    async fn create(&self, user: &User) -> Result<bool, RepositoryError> {
        let record = serde_json::to_string(user)?;
        let mut conn = self.redis.manager();
        let created: bool = conn.hset_nx(USERS_KEY, &user.username, record).await?;
        Ok(created)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let mut conn = self.redis.manager();
        let record: Option<String> = conn.hget(USERS_KEY, username).await?;
        record
            .map(|r| serde_json::from_str(&r).map_err(RepositoryError::from))
            .transpose()
    }
}
