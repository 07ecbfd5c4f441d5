//! Error types for the unme-client crate.

use thiserror::Error;
use unme_crypto::CryptoError;

/// Errors surfaced by the realtime channel and the chat orchestrator.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The socket failed to open or closed unexpectedly. Recovered by the
    /// bounded reconnect loop.
    #[error("connection error: {0}")]
    Connection(String),

    /// Token fetch failed or the relay rejected the token. Never retried.
    #[error("authentication token error: {0}")]
    AuthToken(String),

    /// No identity, unreadable key, or encryption failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// An envelope could not be encoded, or the channel was misused.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The direct durable write used as the send fallback failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from a [`MessageStore`](crate::store::MessageStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not authenticated: {0}")]
    Unauthorized(String),

    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("invalid message: {0}")]
    Invalid(String),
}
