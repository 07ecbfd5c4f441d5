//! Explicit session context threaded through the client components.

use std::sync::Arc;

use async_trait::async_trait;
use unme_shared::error::UnmeError;
use unme_shared::ids::Identity;

/// The external auth collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Identity of the signed-in participant, if any.
    fn current_identity(&self) -> Option<Identity>;

    /// A short-lived bearer token for the current identity.
    async fn get_token(&self) -> Result<String, UnmeError>;
}

/// Identity and token access for one signed-in participant.
///
/// Built once at session start and passed to every component that needs
/// either; cheap to clone.
#[derive(Clone)]
pub struct Session {
    provider: Arc<dyn AuthProvider>,
}

impl Session {
    pub fn new(provider: impl AuthProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// The current identity; blank identities count as signed out.
    pub fn identity(&self) -> Option<Identity> {
        self.provider.current_identity().filter(|id| !id.is_empty())
    }

    pub async fn token(&self) -> Result<String, UnmeError> {
        self.provider.get_token().await
    }
}

/// Provider with a fixed identity and token, for the CLI and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    identity: Option<Identity>,
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(identity: impl Into<Identity>, token: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            token: Some(token.into()),
        }
    }

    /// No identity and no token: every operation needing either fails.
    pub fn signed_out() -> Self {
        Self {
            identity: None,
            token: None,
        }
    }

    /// An identity whose token fetch always fails.
    pub fn without_token(identity: impl Into<Identity>) -> Self {
        Self {
            identity: Some(identity.into()),
            token: None,
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }

    async fn get_token(&self) -> Result<String, UnmeError> {
        self.token.clone().ok_or(UnmeError::Unauthorized)
    }
}
