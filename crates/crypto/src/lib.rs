//! unme-crypto: client-side message encryption for Unme.
//!
//! Provides the per-identity symmetric key store (device-local SQLite) and the
//! AES-256-CBC message cipher with a colon-delimited hex encoding suitable for
//! JSON transport and document storage.

pub mod cipher;
pub mod error;
pub mod key;
pub mod storage;

pub use cipher::{decrypt, decrypt_or_placeholder, encrypt};
pub use error::CryptoError;
pub use key::EncryptionKey;
pub use storage::KeyStore;
