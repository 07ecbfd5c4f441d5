use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use unme_shared::api::ws::{error_codes, ClientEnvelope, ServerEnvelope};
use unme_shared::ids::Identity;

use crate::state::AppState;

use super::registry::Outbound;
use super::relay::{relay_message, InboundMessage};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u8 = 2;

/// Handle a single WebSocket connection after upgrade.
pub async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_sender, ws_receiver) = socket.split();

    let registration = state.registry.register(identity.clone());
    let connection_id = registration.connection_id;
    tracing::info!(user_id = %identity, connection_id, "connection established");

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_handle = tokio::spawn(send_loop(
        ws_sender,
        registration.receiver,
        pong_received.clone(),
    ));
    let mut recv_handle = tokio::spawn(recv_loop(
        ws_receiver,
        state.clone(),
        identity.clone(),
        connection_id,
        pong_received,
    ));

    // Wait for either task to finish, then abort the other
    tokio::select! {
        _ = &mut send_handle => {
            recv_handle.abort();
            tracing::debug!(user_id = %identity, "send loop exited, aborting recv loop");
        }
        _ = &mut recv_handle => {
            send_handle.abort();
            tracing::debug!(user_id = %identity, "recv loop exited, aborting send loop");
        }
    }

    if state.registry.unregister(&identity, connection_id) {
        tracing::info!(user_id = %identity, connection_id, "connection cleaned up");
    } else {
        tracing::debug!(user_id = %identity, connection_id, "superseded connection closed");
    }
}

async fn send_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    pong_received: Arc<AtomicBool>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // skip immediate first tick
    let mut missed_pongs: u8 = 0;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(Outbound::Envelope(envelope)) => {
                        match serde_json::to_string(&envelope) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize ServerEnvelope");
                            }
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        }))).await;
                        break;
                    }
                    None => {
                        // Channel closed (shutdown)
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "going away".into(),
                        }))).await;
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if !pong_received.swap(false, Ordering::SeqCst) {
                    missed_pongs += 1;
                    if missed_pongs >= MAX_MISSED_PONGS {
                        tracing::info!("connection timed out: no pong received");
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "ping timeout".into(),
                        }))).await;
                        break;
                    }
                } else {
                    missed_pongs = 0;
                }
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn recv_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: AppState,
    identity: Identity,
    connection_id: u64,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEnvelope>(&text) {
                Ok(envelope) => {
                    handle_client_envelope(&state, &identity, connection_id, envelope).await;
                }
                Err(e) => {
                    tracing::debug!(user_id = %identity, error = %e, "unparseable frame");
                    send_error(
                        &state,
                        &identity,
                        connection_id,
                        error_codes::INVALID_MESSAGE_FORMAT,
                        "invalid message format",
                    );
                }
            },
            Ok(Message::Pong(_)) => {
                pong_received.store(true, Ordering::SeqCst);
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Ok(Message::Binary(_)) => {
                send_error(
                    &state,
                    &identity,
                    connection_id,
                    error_codes::INVALID_MESSAGE_FORMAT,
                    "binary messages not supported",
                );
            }
            Ok(Message::Ping(_)) => {
                // Axum auto-responds with Pong
            }
            Err(e) => {
                tracing::debug!(error = %e, "websocket receive error");
                break;
            }
        }
    }
}

async fn handle_client_envelope(
    state: &AppState,
    identity: &Identity,
    connection_id: u64,
    envelope: ClientEnvelope,
) {
    match envelope {
        ClientEnvelope::Authenticate { token } => match state.jwt.validate_token(&token) {
            Ok(claimed) if claimed == *identity => {
                tracing::debug!(user_id = %identity, "authenticate envelope accepted");
            }
            Ok(claimed) => {
                tracing::warn!(user_id = %identity, claimed = %claimed, "authenticate envelope names another identity");
                send_error(
                    state,
                    identity,
                    connection_id,
                    error_codes::AUTHENTICATION_FAILED,
                    "token does not match connection identity",
                );
            }
            Err(e) => {
                tracing::debug!(user_id = %identity, error = %e, "authenticate envelope rejected");
                send_error(
                    state,
                    identity,
                    connection_id,
                    error_codes::AUTHENTICATION_FAILED,
                    "invalid authentication token",
                );
            }
        },
        ClientEnvelope::Message {
            recipient_id,
            content,
            is_encrypted,
            id,
            ..
        } => {
            let inbound = InboundMessage {
                recipient_id,
                content,
                is_encrypted,
                id,
            };
            relay_message(state, identity, connection_id, inbound).await;
        }
    }
}

fn send_error(state: &AppState, identity: &Identity, connection_id: u64, code: u32, message: &str) {
    let err = ServerEnvelope::Error {
        code,
        message: message.to_string(),
    };
    state
        .registry
        .send_to_connection(identity, connection_id, err);
}
