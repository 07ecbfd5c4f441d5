//! Error types for the unme-crypto crate.

use thiserror::Error;

/// Errors that can occur during key management and message encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption or decryption was attempted without an authenticated identity.
    #[error("encryption key unavailable: no authenticated identity")]
    KeyUnavailable,

    /// Stored or supplied key material is invalid (wrong length, not hex, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The encoded ciphertext does not have the `<iv>:<ciphertext>` shape.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Decryption failed (wrong key, tampered ciphertext, bad padding).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption could not be performed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Local key storage error.
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<CryptoError> for unme_shared::error::UnmeError {
    fn from(err: CryptoError) -> Self {
        unme_shared::error::UnmeError::Crypto(err.to_string())
    }
}
