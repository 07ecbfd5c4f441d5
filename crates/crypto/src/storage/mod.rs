//! Device-local durable key store.
//!
//! One encryption key per identity, stored hex-encoded under
//! `encryption_key_<identity>` in a SQLite-backed key-value table. A key is
//! generated on first use and never regenerated for the same identity, so
//! previously sent history stays decryptable.

pub mod migrations;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use unme_shared::constants::ENCRYPTION_KEY_PREFIX;
use unme_shared::ids::Identity;
use unme_shared::time::now_secs;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::key::EncryptionKey;

/// Storage entry name for an identity's key.
pub fn storage_key(identity: &Identity) -> String {
    format!("{ENCRYPTION_KEY_PREFIX}{identity}")
}

pub struct KeyStore {
    conn: Mutex<Connection>,
}

impl KeyStore {
    pub fn open(path: &Path) -> Result<Self, CryptoError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CryptoError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CryptoError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CryptoError> {
        self.conn
            .lock()
            .map_err(|_| CryptoError::StorageError("key store lock poisoned".into()))
    }

    /// Return the key for `identity`, generating and persisting one on first use.
    ///
    /// Fails with [`CryptoError::KeyUnavailable`] when no identity is established.
    /// An existing entry is never overwritten: the insert is conditional and the
    /// stored value is read back, so concurrent first calls converge on one key.
    pub fn get_or_create_key(
        &self,
        identity: Option<&Identity>,
    ) -> Result<EncryptionKey, CryptoError> {
        let identity = identity
            .filter(|id| !id.is_empty())
            .ok_or(CryptoError::KeyUnavailable)?;
        let name = storage_key(identity);
        let conn = self.lock()?;

        if let Some(stored) = read_value(&conn, &name)? {
            return EncryptionKey::from_hex(&stored);
        }

        let candidate = EncryptionKey::generate();
        let inserted = conn.execute(
            "INSERT INTO local_storage (key, value, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO NOTHING",
            rusqlite::params![name, candidate.to_hex().as_str(), now_secs()],
        )?;
        if inserted == 1 {
            tracing::info!(identity = %identity, "generated new encryption key");
            return Ok(candidate);
        }

        let stored = read_value(&conn, &name)?
            .ok_or_else(|| CryptoError::StorageError("key vanished after insert".into()))?;
        EncryptionKey::from_hex(&stored)
    }

    /// Read the key for `identity` without generating one.
    pub fn get_key(&self, identity: &Identity) -> Result<Option<EncryptionKey>, CryptoError> {
        let conn = self.lock()?;
        read_value(&conn, &storage_key(identity))?
            .map(|stored| EncryptionKey::from_hex(&stored))
            .transpose()
    }

    /// Provision a key delivered out of band.
    ///
    /// Importing the key that is already stored is a no-op; importing a
    /// different key for an identity that already has one is refused.
    pub fn import_key(&self, identity: &Identity, key: &EncryptionKey) -> Result<(), CryptoError> {
        if identity.is_empty() {
            return Err(CryptoError::KeyUnavailable);
        }
        let name = storage_key(identity);
        let conn = self.lock()?;
        if let Some(stored) = read_value(&conn, &name)? {
            return if EncryptionKey::from_hex(&stored)? == *key {
                Ok(())
            } else {
                Err(CryptoError::InvalidKey(format!(
                    "a different key is already stored for {identity}"
                )))
            };
        }
        conn.execute(
            "INSERT INTO local_storage (key, value, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, key.to_hex().as_str(), now_secs()],
        )?;
        Ok(())
    }
}

fn read_value(conn: &Connection, name: &str) -> Result<Option<Zeroizing<String>>, CryptoError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM local_storage WHERE key = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map(Zeroizing::new))
}
