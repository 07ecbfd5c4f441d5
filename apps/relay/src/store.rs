//! Durable message and conversation storage.

use sqlx::SqlitePool;
use unme_shared::api::message::{ConversationResponse, LastMessage, StoredMessage};
use unme_shared::constants::{ENCRYPTED_PREVIEW, PREVIEW_MAX_CHARS};
use unme_shared::ids::{ChatId, Identity, MessageId};

/// A message ready to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: Identity,
    pub recipient_id: Identity,
    pub content: String,
    pub is_encrypted: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Inserted(StoredMessage),
    /// The id was already stored for the same sender and chat; nothing was written.
    Existing(StoredMessage),
    /// The id is taken by a message from another sender or chat.
    Conflict,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    sender_id: String,
    content: String,
    is_encrypted: bool,
    timestamp: i64,
    read: bool,
}

impl MessageRow {
    fn into_stored(self) -> Result<StoredMessage, sqlx::Error> {
        let id = self
            .id
            .parse::<MessageId>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(StoredMessage {
            id,
            chat_id: ChatId::from_stored(self.chat_id),
            sender_id: Identity::from(self.sender_id),
            content: self.content,
            is_encrypted: self.is_encrypted,
            timestamp: self.timestamp,
            read: self.read,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: String,
    participant_a: String,
    participant_b: String,
    created_at: i64,
    updated_at: i64,
    last_message_id: Option<String>,
    last_message_preview: Option<String>,
    last_message_sender: Option<String>,
    last_message_at: Option<i64>,
}

impl ChatRow {
    fn into_response(self) -> ConversationResponse {
        let last_message = match (
            self.last_message_id.and_then(|id| id.parse::<MessageId>().ok()),
            self.last_message_preview,
            self.last_message_sender,
            self.last_message_at,
        ) {
            (Some(id), Some(content), Some(sender), Some(timestamp)) => Some(LastMessage {
                id,
                content,
                sender_id: Identity::from(sender),
                timestamp,
            }),
            _ => None,
        };
        ConversationResponse {
            id: ChatId::from_stored(self.id),
            participants: vec![
                Identity::from(self.participant_a),
                Identity::from(self.participant_b),
            ],
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message,
        }
    }
}

/// Last-message preview: the first 50 characters of plaintext, or a fixed
/// placeholder for ciphertext.
pub fn preview(content: &str, is_encrypted: bool) -> String {
    if is_encrypted {
        ENCRYPTED_PREVIEW.to_string()
    } else {
        content.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}

const SELECT_MESSAGE: &str =
    "SELECT id, chat_id, sender_id, content, is_encrypted, timestamp, read FROM messages";

/// Create the chat if needed, insert the message and update the chat's
/// last-message summary in one transaction.
///
/// Re-sending an id that is already stored for the same sender and chat
/// returns the stored row unchanged.
pub async fn persist_message(
    db: &SqlitePool,
    msg: &NewMessage,
) -> Result<PersistOutcome, sqlx::Error> {
    let mut tx = db.begin().await?;

    let existing = sqlx::query_as::<_, MessageRow>(&format!("{SELECT_MESSAGE} WHERE id = ?1"))
        .bind(msg.id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if let Some(row) = existing {
        let stored = row.into_stored()?;
        return Ok(
            if stored.sender_id == msg.sender_id && stored.chat_id == msg.chat_id {
                PersistOutcome::Existing(stored)
            } else {
                PersistOutcome::Conflict
            },
        );
    }

    let (a, b) = if msg.sender_id <= msg.recipient_id {
        (&msg.sender_id, &msg.recipient_id)
    } else {
        (&msg.recipient_id, &msg.sender_id)
    };
    sqlx::query(
        "INSERT INTO chats (id, participant_a, participant_b, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(msg.chat_id.as_str())
    .bind(a.as_str())
    .bind(b.as_str())
    .bind(msg.timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO messages (id, chat_id, sender_id, content, is_encrypted, timestamp, read) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
    )
    .bind(msg.id.to_string())
    .bind(msg.chat_id.as_str())
    .bind(msg.sender_id.as_str())
    .bind(&msg.content)
    .bind(msg.is_encrypted)
    .bind(msg.timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE chats SET updated_at = ?1, last_message_id = ?2, last_message_preview = ?3, \
         last_message_sender = ?4, last_message_at = ?1 \
         WHERE id = ?5",
    )
    .bind(msg.timestamp)
    .bind(msg.id.to_string())
    .bind(preview(&msg.content, msg.is_encrypted))
    .bind(msg.sender_id.as_str())
    .bind(msg.chat_id.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(PersistOutcome::Inserted(StoredMessage {
        id: msg.id,
        chat_id: msg.chat_id.clone(),
        sender_id: msg.sender_id.clone(),
        content: msg.content.clone(),
        is_encrypted: msg.is_encrypted,
        timestamp: msg.timestamp,
        read: false,
    }))
}

/// All messages of a chat, oldest first.
pub async fn list_messages(
    db: &SqlitePool,
    chat_id: &ChatId,
) -> Result<Vec<StoredMessage>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "{SELECT_MESSAGE} WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC"
    ))
    .bind(chat_id.as_str())
    .fetch_all(db)
    .await?;
    rows.into_iter().map(MessageRow::into_stored).collect()
}

pub async fn get_conversation(
    db: &SqlitePool,
    chat_id: &ChatId,
) -> Result<Option<ConversationResponse>, sqlx::Error> {
    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT id, participant_a, participant_b, created_at, updated_at, last_message_id, \
         last_message_preview, last_message_sender, last_message_at \
         FROM chats WHERE id = ?1",
    )
    .bind(chat_id.as_str())
    .fetch_optional(db)
    .await?;
    Ok(row.map(ChatRow::into_response))
}
