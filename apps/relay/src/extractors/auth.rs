use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use unme_shared::ids::Identity;

use crate::state::AppState;

/// Identity extracted from a valid bearer token.
///
/// Use this as a handler parameter to require authentication:
/// ```ignore
/// async fn my_handler(auth: AuthUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug)]
pub struct AuthUser {
    pub identity: Identity,
}

#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("auth: missing or non-ASCII Authorization header");
                AuthRejection
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            tracing::debug!("auth: Authorization header missing Bearer prefix");
            AuthRejection
        })?;

        let identity = state.jwt.validate_token(token).map_err(|e| {
            tracing::debug!(error = %e, "auth: token validation failed");
            AuthRejection
        })?;

        Ok(AuthUser { identity })
    }
}
