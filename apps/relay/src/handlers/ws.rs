use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::connection::handle_connection;

#[derive(Deserialize)]
pub struct WsQueryParams {
    pub token: Option<String>,
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// GET /ws?token=<jwt> -- Upgrade to WebSocket.
///
/// The token is verified before the upgrade; the socket is bound to the
/// identity it names for its whole lifetime.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(error = %e, "non-upgrade request on /ws");
            return reject(StatusCode::UPGRADE_REQUIRED, "Expected WebSocket upgrade");
        }
    };

    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return reject(StatusCode::UNAUTHORIZED, "Authentication token required");
    };

    let identity = match state.jwt.validate_token(&token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(error = %e, "ws upgrade with invalid token");
            return reject(StatusCode::UNAUTHORIZED, "Invalid authentication token");
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}
