//! Wire Protocol Types
//!
//! Event and record types exchanged with the chat backend, both over the
//! websocket channel and in HTTP response envelopes. Field names on the wire
//! are camelCase; event tags are snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of a real-time conversation: one room per negotiated session.
///
/// Derived from the session id once one exists, or a deterministic
/// user/expert composite before a session has been created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Room keyed by an existing session id.
    pub fn from_session(session_id: &str) -> Self {
        Self(session_id.to_string())
    }

    /// Deterministic fallback when no session id is known yet.
    pub fn fallback(user_id: &str, expert_id: &str) -> Self {
        Self(format!("{user_id}_{expert_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the consultation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Expert,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Expert => "expert",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

/// Backend-tracked acceptance status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

/// A negotiated engagement between one user and one expert.
///
/// Status is mutated only by the backend; the client polls, never writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub expert_id: String,
    pub status: SessionStatus,
}

/// An ordered event in a room's log. The id is assigned by the backend,
/// never by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: String,
    pub sender_type: SenderType,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// Outbound send payload. Text sends carry no id (the backend assigns one);
/// upload-synthesized sends carry the id from the upload response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub room_id: RoomId,
    pub session_id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub expert_id: String,
}

/// Who this client is within a room, bundled once and threaded through the
/// stream manager and upload coordinator.
#[derive(Debug, Clone)]
pub struct ChatIdentity {
    pub room_id: RoomId,
    pub session_id: Option<String>,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub user_id: String,
    pub expert_id: String,
}

impl ChatIdentity {
    /// Session id as sent on the wire: falls back to the room id when no
    /// session has been negotiated yet.
    pub fn wire_session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(self.room_id.as_str())
    }
}

/// Events sent FROM the client TO the backend over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom { room_id: RoomId },
    LeaveRoom { room_id: RoomId },
    TypingStart { room_id: RoomId, sender_id: String },
    TypingStop { room_id: RoomId, sender_id: String },
    SendMessage(OutgoingMessage),
}

/// Events received FROM the backend over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    UserTyping {
        room_id: RoomId,
        user_id: String,
        is_typing: bool,
    },
    MessageRead {
        room_id: RoomId,
        reader_id: String,
    },
    MessageError {
        error: String,
    },
    JoinSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    JoinError {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_fallback_is_deterministic() {
        let a = RoomId::fallback("u-1", "e-9");
        let b = RoomId::fallback("u-1", "e-9");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "u-1_e-9");
    }

    #[test]
    fn client_event_wire_shape() {
        let ev = ClientEvent::TypingStart {
            room_id: RoomId::new("r1"),
            sender_id: "u-1".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "typing_start");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["senderId"], "u-1");
    }

    #[test]
    fn message_accepts_mongo_style_id() {
        let json = serde_json::json!({
            "_id": "m1",
            "roomId": "r1",
            "senderId": "u-1",
            "senderType": "user",
            "content": "hello",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(!msg.is_read);
    }

    #[test]
    fn server_event_round_trip() {
        let ev = ServerEvent::MessageRead {
            room_id: RoomId::new("r1"),
            reader_id: "e-1".to_string(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
