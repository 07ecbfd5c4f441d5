use crate::api::ws::RelayedMessage;
use crate::ids::{ChatId, Identity, MessageId};
use serde::{Deserialize, Serialize};

/// A message as persisted in a conversation's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: Identity,
    pub content: String,
    pub is_encrypted: bool,
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
}

impl From<StoredMessage> for RelayedMessage {
    fn from(m: StoredMessage) -> Self {
        RelayedMessage {
            id: m.id,
            chat_id: m.chat_id,
            content: m.content,
            sender_id: m.sender_id,
            is_encrypted: m.is_encrypted,
            timestamp: m.timestamp,
            is_decrypted: None,
        }
    }
}

/// Direct durable write of a message, used when the live channel is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub content: String,
    pub is_encrypted: bool,
}

/// Denormalized summary of a conversation's latest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    /// Truncated plaintext, or a fixed placeholder for encrypted messages.
    pub content: String,
    pub sender_id: Identity,
    pub timestamp: i64,
}

/// Conversation record between two participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: ChatId,
    pub participants: Vec<Identity>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_message: Option<LastMessage>,
}
