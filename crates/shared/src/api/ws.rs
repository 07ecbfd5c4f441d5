use crate::ids::{ChatId, Identity, MessageId};
use serde::{Deserialize, Serialize};

/// Envelopes sent from the client to the relay over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    /// First frame after the socket opens; repeats the handshake token.
    Authenticate { token: String },
    /// A chat message. `content` is ciphertext whenever `is_encrypted` is true.
    Message {
        recipient_id: Identity,
        content: String,
        #[serde(default)]
        is_encrypted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
        /// Client-generated id so optimistic entries and relayed copies share one id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
    },
}

impl ClientEnvelope {
    /// Build an outbound plaintext `message` envelope from `sender` to `recipient`.
    /// The channel encrypts `content` before it leaves the process.
    pub fn message(sender: &Identity, recipient: Identity, content: impl Into<String>) -> Self {
        let chat_id = ChatId::for_pair(sender, &recipient);
        ClientEnvelope::Message {
            recipient_id: recipient,
            content: content.into(),
            is_encrypted: false,
            chat_id: Some(chat_id),
            id: Some(MessageId::new()),
        }
    }
}

/// A message as forwarded by the relay to a live recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
    pub sender_id: Identity,
    pub is_encrypted: bool,
    pub timestamp: i64,
    /// Set by the receiving client only: whether `content` was decrypted locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_decrypted: Option<bool>,
}

/// Envelopes sent from the relay to the client over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
    NewMessage {
        message: RelayedMessage,
    },
    MessageDelivered {
        message_id: MessageId,
        chat_id: ChatId,
        timestamp: i64,
    },
    Error {
        code: u32,
        message: String,
    },
}

/// WebSocket error and close codes.
pub mod error_codes {
    pub const AUTHENTICATION_FAILED: u32 = 4001;
    pub const INVALID_MESSAGE_FORMAT: u32 = 4004;
    pub const PERSISTENCE_FAILED: u32 = 5000;
    /// Close code sent to a connection superseded by a newer one for the same identity.
    pub const CONNECTION_REPLACED: u16 = 4000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_uses_lowercase_type_tag() {
        let json = serde_json::to_value(ClientEnvelope::Authenticate {
            token: "tok".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "authenticate");
        assert_eq!(json["token"], "tok");
    }

    #[test]
    fn message_fields_are_camel_case() {
        let env = ClientEnvelope::message(&Identity::from("alice"), Identity::from("bob"), "hi");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["recipientId"], "bob");
        assert_eq!(json["isEncrypted"], false);
        assert_eq!(json["chatId"], "alice_bob");
        assert!(json.get("id").is_some());
    }

    #[test]
    fn message_without_optional_fields_parses() {
        let json = r#"{"type":"message","recipientId":"bob","content":"abc:def","isEncrypted":true}"#;
        match serde_json::from_str::<ClientEnvelope>(json).unwrap() {
            ClientEnvelope::Message {
                recipient_id,
                is_encrypted,
                chat_id,
                id,
                ..
            } => {
                assert_eq!(recipient_id.as_str(), "bob");
                assert!(is_encrypted);
                assert!(chat_id.is_none());
                assert!(id.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn message_missing_recipient_fails() {
        let json = r#"{"type":"message","content":"x"}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }

    #[test]
    fn new_message_matches_wire_shape() {
        let env = ServerEnvelope::NewMessage {
            message: RelayedMessage {
                id: MessageId::new(),
                chat_id: ChatId::for_pair(&"alice".into(), &"bob".into()),
                content: "iv:ct".into(),
                sender_id: "alice".into(),
                is_encrypted: true,
                timestamp: 1_700_000_000_000,
                is_decrypted: None,
            },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "newMessage");
        assert_eq!(json["message"]["senderId"], "alice");
        assert_eq!(json["message"]["chatId"], "alice_bob");
        assert_eq!(json["message"]["isEncrypted"], true);
        assert!(json["message"].get("isDecrypted").is_none());
    }

    #[test]
    fn message_delivered_matches_wire_shape() {
        let id = MessageId::new();
        let env = ServerEnvelope::MessageDelivered {
            message_id: id,
            chat_id: ChatId::for_pair(&"a".into(), &"b".into()),
            timestamp: 42,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "messageDelivered");
        assert_eq!(json["messageId"], id.to_string());
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn unknown_type_fails_deserialization() {
        let json = r#"{"type": "typing"}"#;
        assert!(serde_json::from_str::<ServerEnvelope>(json).is_err());
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }
}
