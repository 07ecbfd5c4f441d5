use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use unme_shared::error::UnmeError;

/// Newtype wrapper for `UnmeError` that implements `IntoResponse`.
///
/// Needed because of the orphan rule: neither the trait (`IntoResponse`)
/// nor the type (`UnmeError`) is defined in this crate.
pub struct ServerError(pub UnmeError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            UnmeError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            UnmeError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            UnmeError::Forbidden => (StatusCode::FORBIDDEN, self.0.to_string()),
            UnmeError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            UnmeError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            UnmeError::Crypto(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            // Storage details stay in the logs.
            UnmeError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to persist message".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<UnmeError> for ServerError {
    fn from(e: UnmeError) -> Self {
        ServerError(e)
    }
}
