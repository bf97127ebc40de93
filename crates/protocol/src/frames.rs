use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{api::ChatSummary, frame_types};

// ── Inbound ──────────────────────────────────────────────────────────────────

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Chat { chat_id: i64, content: String },
    Join { chat_id: i64 },
    Leave { chat_id: i64 },
    /// Well-formed envelope with a type this server does not handle.
    Unrecognized { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct ChatPayload {
    chat_id: i64,
    content: String,
}

#[derive(Deserialize)]
struct RoomPayload {
    chat_id: i64,
}

impl Event {
    /// Decode a text frame. Errors mean the frame was not JSON, had no `type`,
    /// or carried a payload of the wrong shape for its type.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let Envelope { kind, payload } = serde_json::from_str(text)?;
        let event = match kind.as_str() {
            frame_types::MESSAGE => {
                let ChatPayload { chat_id, content } = serde_json::from_value(payload)?;
                Self::Chat { chat_id, content }
            },
            frame_types::JOIN_CHAT => {
                let RoomPayload { chat_id } = serde_json::from_value(payload)?;
                Self::Join { chat_id }
            },
            frame_types::LEAVE_CHAT => {
                let RoomPayload { chat_id } = serde_json::from_value(payload)?;
                Self::Leave { chat_id }
            },
            _ => Self::Unrecognized { kind },
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Chat { .. } => frame_types::MESSAGE,
            Self::Join { .. } => frame_types::JOIN_CHAT,
            Self::Leave { .. } => frame_types::LEAVE_CHAT,
            Self::Unrecognized { kind } => kind,
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// A server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message(ChatMessage),
    System(SystemNotice),
    NewChat(ChatSummary),
}

/// A persisted chat message as fanned out to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub content: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub chat_id: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub room_id: i64,
    pub text: String,
}

impl OutboundFrame {
    pub fn system(room_id: i64, text: impl Into<String>) -> Self {
        Self::System(SystemNotice {
            room_id,
            text: text.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_inbound_type() {
        assert_eq!(
            Event::decode(r#"{"type":"message","payload":{"chat_id":3,"content":"hi"}}"#)
                .unwrap(),
            Event::Chat {
                chat_id: 3,
                content: "hi".into()
            }
        );
        assert_eq!(
            Event::decode(r#"{"type":"join_chat","payload":{"chat_id":4}}"#).unwrap(),
            Event::Join { chat_id: 4 }
        );
        assert_eq!(
            Event::decode(r#"{"type":"leave_chat","payload":{"chat_id":4}}"#).unwrap(),
            Event::Leave { chat_id: 4 }
        );
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let event = Event::decode(r#"{"type":"typing","payload":{"chat_id":1}}"#).unwrap();
        assert_eq!(event, Event::Unrecognized {
            kind: "typing".into()
        });
        assert_eq!(event.kind(), "typing");

        // Payload is optional for types we ignore anyway.
        assert!(matches!(
            Event::decode(r#"{"type":"ping"}"#).unwrap(),
            Event::Unrecognized { .. }
        ));
    }

    #[test]
    fn malformed_frames_fail_to_decode() {
        assert!(Event::decode("not json").is_err());
        assert!(Event::decode(r#"{"payload":{}}"#).is_err());
        assert!(Event::decode(r#"{"type":"message","payload":{"chat_id":"x"}}"#).is_err());
        assert!(Event::decode(r#"{"type":"join_chat"}"#).is_err());
    }

    #[test]
    fn outbound_message_shape() {
        let frame = OutboundFrame::Message(ChatMessage {
            message_id: 10,
            content: "hello".into(),
            sender_id: 1,
            sender_name: "alice".into(),
            chat_id: 5,
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["payload"]["message_id"], 10);
        assert_eq!(value["payload"]["sender_name"], "alice");
        assert_eq!(value["payload"]["chat_id"], 5);
        assert_eq!(value["payload"]["timestamp"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn outbound_system_and_new_chat_tags() {
        let value = serde_json::to_value(OutboundFrame::system(7, "bob joined")).unwrap();
        assert_eq!(value["type"], "system");
        assert_eq!(value["payload"]["room_id"], 7);
        assert_eq!(value["payload"]["text"], "bob joined");

        let epoch = DateTime::from_timestamp_millis(0).unwrap();
        let value = serde_json::to_value(OutboundFrame::NewChat(ChatSummary {
            id: 2,
            name: "general".into(),
            is_group: true,
            creator_id: 1,
            created_at: epoch,
            updated_at: epoch,
        }))
        .unwrap();
        assert_eq!(value["type"], "new_chat");
        assert_eq!(value["payload"]["name"], "general");
    }
}
