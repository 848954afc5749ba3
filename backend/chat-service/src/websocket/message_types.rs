use crate::models::{Message, MessageId, UserInfo};
use serde::{Deserialize, Serialize};

/// Inbound frame from a client. Identity is never taken from here.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub status: PresenceStatus,
    pub user: UserInfo,
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsEnvelope {
    Chat(Message),
    Presence(Presence),
    UserList(Vec<UserInfo>),
    History(Vec<Message>),
}

impl WsEnvelope {
    pub fn presence(status: PresenceStatus, user: UserInfo) -> Self {
        WsEnvelope::Presence(Presence { status, user })
    }
}

/// An envelope serialized once and shared by every mailbox it is queued in.
///
/// `chat_id` is kept alongside the JSON so the write pump can drop live
/// messages already delivered in the history backfill without re-parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub chat_id: Option<MessageId>,
    pub payload: String,
}

impl OutboundFrame {
    pub fn encode(envelope: &WsEnvelope) -> Result<Self, serde_json::Error> {
        let chat_id = match envelope {
            WsEnvelope::Chat(message) => Some(message.id),
            _ => None,
        };
        Ok(Self {
            chat_id,
            payload: serde_json::to_string(envelope)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;

    fn bob() -> UserInfo {
        UserInfo {
            id: "u-2".into(),
            username: "bob".into(),
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let presence = serde_json::to_value(WsEnvelope::presence(PresenceStatus::Left, bob())).unwrap();
        assert_eq!(presence["type"], "presence");
        assert_eq!(presence["data"]["status"], "left");
        assert_eq!(presence["data"]["user"]["username"], "bob");

        let list = serde_json::to_value(WsEnvelope::UserList(vec![bob()])).unwrap();
        assert_eq!(list["type"], "user_list");
        assert_eq!(list["data"][0]["id"], "u-2");

        let history = serde_json::to_value(WsEnvelope::History(Vec::new())).unwrap();
        assert_eq!(history["type"], "history");
        assert_eq!(history["data"], serde_json::json!([]));
    }

    #[test]
    fn test_frame_keeps_chat_id() {
        let message = NewMessage {
            from: "u-2".into(),
            from_name: "bob".into(),
            to: None,
            content: "hi".into(),
        }
        .into_message(MessageId::new(5, 1));

        let frame = OutboundFrame::encode(&WsEnvelope::Chat(message)).unwrap();
        assert_eq!(frame.chat_id, Some(MessageId::new(5, 1)));
        assert!(frame.payload.starts_with(r#"{"type":"chat","data":{"id":"5-1""#));

        let frame = OutboundFrame::encode(&WsEnvelope::UserList(vec![bob()])).unwrap();
        assert_eq!(frame.chat_id, None);
    }

    #[test]
    fn test_client_message_ignores_extra_fields() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"content":"hi","from":"spoofed"}"#).unwrap();
        assert_eq!(parsed.content, "hi");
        assert!(serde_json::from_str::<ClientMessage>(r#"{"text":"hi"}"#).is_err());
    }
}
