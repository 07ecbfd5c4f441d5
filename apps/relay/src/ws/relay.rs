use unme_shared::api::message::StoredMessage;
use unme_shared::api::ws::{error_codes, RelayedMessage, ServerEnvelope};
use unme_shared::constants::MAX_MESSAGE_SIZE_BYTES;
use unme_shared::ids::{ChatId, Identity, MessageId};

use crate::state::AppState;
use crate::store::{self, NewMessage, PersistOutcome};

/// A `message` envelope as received from an authenticated sender.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub recipient_id: Identity,
    pub content: String,
    pub is_encrypted: bool,
    pub id: Option<MessageId>,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid message: {0}")]
    Invalid(String),
    #[error("message id is already in use")]
    IdConflict,
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl RelayError {
    /// Code carried by the `error` envelope sent back to the sender.
    pub fn code(&self) -> u32 {
        match self {
            RelayError::Invalid(_) | RelayError::IdConflict => error_codes::INVALID_MESSAGE_FORMAT,
            RelayError::Persistence(_) => error_codes::PERSISTENCE_FAILED,
        }
    }

    /// Message for the sender. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Persistence(_) => "failed to persist message".to_string(),
            other => other.to_string(),
        }
    }
}

fn validate(msg: &InboundMessage) -> Result<(), RelayError> {
    if msg.recipient_id.is_empty() {
        return Err(RelayError::Invalid("recipientId is required".into()));
    }
    if msg.content.is_empty() {
        return Err(RelayError::Invalid("content is required".into()));
    }
    if msg.content.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(RelayError::Invalid(format!(
            "content exceeds {MAX_MESSAGE_SIZE_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Validate and durably store a message from `sender`.
///
/// The chat id is always derived from the two participants; a client-sent
/// chat id is never trusted. Returns the stored message and whether it was
/// newly written.
pub async fn persist(
    state: &AppState,
    sender: &Identity,
    msg: InboundMessage,
) -> Result<(StoredMessage, bool), RelayError> {
    validate(&msg)?;

    let new = NewMessage {
        id: msg.id.unwrap_or_else(MessageId::new),
        chat_id: ChatId::for_pair(sender, &msg.recipient_id),
        sender_id: sender.clone(),
        recipient_id: msg.recipient_id,
        content: msg.content,
        is_encrypted: msg.is_encrypted,
        timestamp: state.clock.next(),
    };

    match store::persist_message(&state.db, &new).await? {
        PersistOutcome::Inserted(stored) => Ok((stored, true)),
        PersistOutcome::Existing(stored) => Ok((stored, false)),
        PersistOutcome::Conflict => Err(RelayError::IdConflict),
    }
}

/// Persist, forward to the recipient if online, then acknowledge to the sender.
///
/// A retried id that is already stored is acknowledged again without a
/// second forward. Failures are reported to the sending connection only.
pub async fn relay_message(
    state: &AppState,
    sender: &Identity,
    connection_id: u64,
    msg: InboundMessage,
) {
    let recipient = msg.recipient_id.clone();
    let (stored, inserted) = match persist(state, sender, msg).await {
        Ok(result) => result,
        Err(e) => {
            match &e {
                RelayError::Persistence(db) => {
                    tracing::error!(user_id = %sender, error = %db, "failed to persist message");
                }
                other => {
                    tracing::debug!(user_id = %sender, error = %other, "rejected message");
                }
            }
            let error = ServerEnvelope::Error {
                code: e.code(),
                message: e.client_message(),
            };
            state.registry.send_to_connection(sender, connection_id, error);
            return;
        }
    };

    if inserted {
        let forwarded = state.registry.send(
            &recipient,
            ServerEnvelope::NewMessage {
                message: RelayedMessage::from(stored.clone()),
            },
        );
        tracing::debug!(
            user_id = %sender,
            recipient = %recipient,
            message_id = %stored.id,
            forwarded,
            "message stored"
        );
    }

    let ack = ServerEnvelope::MessageDelivered {
        message_id: stored.id,
        chat_id: stored.chat_id,
        timestamp: stored.timestamp,
    };
    state.registry.send_to_connection(sender, connection_id, ack);
}
