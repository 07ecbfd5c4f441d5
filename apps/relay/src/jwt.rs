use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use unme_shared::error::UnmeError;
use unme_shared::ids::Identity;

use crate::config::ServerConfig;

const MIN_SECRET_BYTES: usize = 32;

/// Verifies the auth provider's HS256 tokens. Issuing is only used by tests and local tooling.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: std::time::Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

fn now_epoch() -> usize {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

impl JwtService {
    pub fn new(config: &ServerConfig) -> Result<Self, UnmeError> {
        let secret = config.jwt_secret.as_bytes();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(UnmeError::Internal(format!(
                "JWT secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl: std::time::Duration::from_secs(config.token_ttl_seconds),
        })
    }

    pub fn issue_token(&self, identity: &Identity) -> Result<String, UnmeError> {
        if identity.is_empty() {
            return Err(UnmeError::Validation("identity must not be empty".into()));
        }
        let now = now_epoch();
        let claims = Claims {
            sub: identity.to_string(),
            exp: now + self.ttl.as_secs() as usize,
            iat: now,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| UnmeError::Internal(format!("JWT encode error: {e}")))
    }

    /// Validate `token` and return the identity it was issued for.
    pub fn validate_token(&self, token: &str) -> Result<Identity, UnmeError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| UnmeError::Unauthorized)?;
        let identity = Identity::from(data.claims.sub);
        if identity.is_empty() {
            return Err(UnmeError::Unauthorized);
        }
        Ok(identity)
    }
}
