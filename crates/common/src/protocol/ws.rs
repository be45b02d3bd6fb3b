// Live-channel event types for the palaver-chat.v1 protocol.
//
// Frames are JSON objects tagged by `type`, with the kebab-case event
// names the chat clients already speak.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AiMode, Attachment, Message, RoomId};

/// Client -> Server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Register this connection's membership in a room.
    JoinRoom {
        room_id: RoomId,
        username: String,
    },

    /// Append a message; may trigger an AI dispatch.
    SendMessage {
        room_id: RoomId,
        sender: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },

    /// Switch the room's AI mode. Carried as a raw string so that invalid
    /// values reach the handler and come back as a scoped error frame
    /// instead of a decode failure.
    ChangeAiMode {
        room_id: RoomId,
        mode: String,
    },

    Typing {
        room_id: RoomId,
        username: String,
    },

    StopTyping {
        room_id: RoomId,
        username: String,
    },

    AddReaction {
        room_id: RoomId,
        message_id: Uuid,
        emoji: String,
        username: String,
    },

    EditMessage {
        room_id: RoomId,
        message_id: Uuid,
        new_text: String,
    },

    DeleteMessage {
        room_id: RoomId,
        message_id: Uuid,
    },

    MarkRead {
        room_id: RoomId,
        message_id: Uuid,
        username: String,
    },

    PinMessage {
        room_id: RoomId,
        message_id: Uuid,
    },

    UnpinMessage {
        room_id: RoomId,
        message_id: Uuid,
    },
}

/// Server -> Client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full message record to append to the client view.
    NewMessage {
        message: Message,
    },

    AiModeChanged {
        mode: AiMode,
    },

    UserTyping {
        username: String,
    },

    UserStopTyping {
        username: String,
    },

    ReactionAdded {
        message_id: Uuid,
        emoji: String,
        username: String,
    },

    /// Full updated record after an edit.
    MessageEdited {
        message: Message,
    },

    MessageDeleted {
        message_id: Uuid,
    },

    MessageRead {
        message_id: Uuid,
        username: String,
    },

    MessagePinned {
        message_id: Uuid,
    },

    MessageUnpinned {
        message_id: Uuid,
    },

    UserJoined {
        username: String,
    },

    UserLeft {
        username: String,
    },

    /// Operation-scoped failure notice; the connection stays open.
    Error {
        code: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

pub fn decode_client_event(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<ClientEvent>(raw)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_decode_from_kebab_case_tags() {
        let frame = r#"{"type":"join-room","room_id":"abc123XY","username":"Alice"}"#;
        let event = decode_client_event(frame).expect("join frame should decode");
        assert_eq!(
            event,
            ClientEvent::JoinRoom { room_id: RoomId::new("abc123XY"), username: "Alice".into() }
        );

        let frame = r#"{"type":"send-message","room_id":"abc123XY","sender":"Alice","text":"hi"}"#;
        let event = decode_client_event(frame).expect("send frame should decode");
        assert!(matches!(event, ClientEvent::SendMessage { attachment: None, .. }));
    }

    #[test]
    fn send_message_tolerates_missing_text_when_attachment_present() {
        let frame = r#"{
            "type": "send-message",
            "room_id": "abc123XY",
            "sender": "Alice",
            "attachment": {"url": "https://files.example/x.pdf", "name": "x.pdf"}
        }"#;
        let event = decode_client_event(frame).expect("attachment-only frame should decode");
        match event {
            ClientEvent::SendMessage { text, attachment, .. } => {
                assert!(text.is_empty());
                assert_eq!(attachment.expect("attachment should be present").name, "x.pdf");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_with_kebab_case_tags() {
        let event = ServerEvent::UserJoined { username: "Bob".into() };
        let encoded = encode_server_event(&event).expect("event should serialize");
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["username"], "Bob");
    }

    #[test]
    fn unknown_event_types_are_rejected() {
        assert!(decode_client_event(r#"{"type":"shout","room_id":"r"}"#).is_err());
        assert!(decode_client_event("not json").is_err());
    }
}
