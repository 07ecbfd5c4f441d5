use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use unme_shared::api::message::{AppendMessageRequest, ConversationResponse, StoredMessage};
use unme_shared::error::UnmeError;
use unme_shared::ids::{ChatId, Identity};

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store;
use crate::ws::relay::{self, InboundMessage, RelayError};

fn db_err(e: sqlx::Error) -> ServerError {
    tracing::error!(error = %e, "database error");
    ServerError(UnmeError::Internal("database error".into()))
}

fn peer_identity(peer_id: String) -> Result<Identity, ServerError> {
    let peer = Identity::from(peer_id);
    if peer.is_empty() {
        return Err(ServerError(UnmeError::Validation(
            "peer id must not be empty".into(),
        )));
    }
    Ok(peer)
}

/// GET /api/conversations/{peer_id}/messages
/// Full history between the caller and `peer_id`, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ServerError> {
    let peer = peer_identity(peer_id)?;
    let chat_id = ChatId::for_pair(&auth.identity, &peer);
    let messages = store::list_messages(&state.db, &chat_id)
        .await
        .map_err(db_err)?;
    Ok(Json(messages))
}

/// POST /api/conversations/{peer_id}/messages
/// Direct durable write used when the live channel is down. The message is
/// stored and summarized but not forwarded to a live recipient.
pub async fn append_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer_id): Path<String>,
    Json(req): Json<AppendMessageRequest>,
) -> Result<(StatusCode, Json<StoredMessage>), ServerError> {
    let peer = peer_identity(peer_id)?;
    let recipient_online = state.registry.is_online(&peer);
    let inbound = InboundMessage {
        recipient_id: peer,
        content: req.content,
        is_encrypted: req.is_encrypted,
        id: req.id,
    };
    match relay::persist(&state, &auth.identity, inbound).await {
        Ok((stored, true)) => {
            // stored only; a live recipient picks it up from history
            tracing::debug!(
                message_id = %stored.id,
                recipient_online,
                "message appended without relay"
            );
            Ok((StatusCode::CREATED, Json(stored)))
        }
        Ok((stored, false)) => Ok((StatusCode::OK, Json(stored))),
        Err(RelayError::Persistence(e)) => {
            tracing::error!(user_id = %auth.identity, error = %e, "failed to persist message");
            Err(ServerError(UnmeError::Persistence(e.to_string())))
        }
        Err(e) => Err(ServerError(UnmeError::Validation(e.to_string()))),
    }
}

/// GET /api/conversations/{peer_id}
pub async fn get_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let peer = peer_identity(peer_id)?;
    let chat_id = ChatId::for_pair(&auth.identity, &peer);
    store::get_conversation(&state.db, &chat_id)
        .await
        .map_err(db_err)?
        .map(Json)
        .ok_or(ServerError(UnmeError::NotFound))
}
