use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Position in a chat log, in Redis Stream entry-id form `<millis>-<seq>`.
///
/// Ordering is numeric on `(millis, seq)`, which matches the order the store
/// assigned the ids. The millisecond part doubles as the message timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId {
    pub millis: u64,
    pub seq: u64,
}

impl MessageId {
    /// `0-0`, strictly before every real entry
    pub const ZERO: MessageId = MessageId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        i64::try_from(self.millis)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_default()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message id: {0:?}")]
pub struct ParseMessageIdError(String);

impl FromStr for MessageId {
    type Err = ParseMessageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMessageIdError(s.to_string());
        match s.split_once('-') {
            Some((millis, seq)) => Ok(Self {
                millis: millis.parse().map_err(|_| err())?,
                seq: seq.parse().map_err(|_| err())?,
            }),
            // Redis accepts a bare millisecond id and reads it as `<ms>-0`
            None => Ok(Self {
                millis: s.parse().map_err(|_| err())?,
                seq: 0,
            }),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A persisted chat message
///
/// `id` and `timestamp` are assigned by the repository on append; `from` and
/// `from_name` come from the authenticated session, never from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub from: String,
    pub from_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A validated message that has not been appended yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub from: String,
    pub from_name: String,
    pub to: Option<String>,
    pub content: String,
}

impl NewMessage {
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            timestamp: id.timestamp(),
            from: self.from,
            from_name: self.from_name,
            to: self.to,
            content: self.content,
        }
    }
}
