use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use unme_shared::api::ws::{error_codes, ServerEnvelope};
use unme_shared::ids::Identity;

const CONNECTION_MPSC_CAPACITY: usize = 256;

/// Item queued for a connection's send loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Envelope(ServerEnvelope),
    /// Send a close frame and stop the send loop.
    Close { code: u16, reason: String },
}

/// Per-connection state stored in the registry.
pub struct ConnectionEntry {
    pub connection_id: u64,
    /// Sender half of the mpsc channel feeding this connection's send loop.
    pub sender: mpsc::Sender<Outbound>,
}

/// Result of [`ConnectionRegistry::register`].
pub struct Registration {
    pub connection_id: u64,
    pub receiver: mpsc::Receiver<Outbound>,
    /// True when an older connection for the same identity was closed.
    pub replaced: bool,
}

/// Live connections, at most one per identity.
pub struct ConnectionRegistry {
    connections: DashMap<Identity, ConnectionEntry>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection for `identity`. Returns the receiver for its send loop.
    ///
    /// An existing connection for the same identity is told to close with
    /// code 4000 and its sender is dropped.
    pub fn register(&self, identity: Identity) -> Registration {
        let (tx, rx) = mpsc::channel(CONNECTION_MPSC_CAPACITY);
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ConnectionEntry {
            connection_id,
            sender: tx,
        };

        let previous = self.connections.insert(identity.clone(), entry);
        let replaced = previous.is_some();
        if let Some(old) = previous {
            let close = Outbound::Close {
                code: error_codes::CONNECTION_REPLACED,
                reason: "replaced".to_string(),
            };
            if let Err(e) = old.sender.try_send(close) {
                tracing::debug!(user_id = %identity, error = %e, "old connection already gone");
            }
            tracing::info!(
                user_id = %identity,
                old_connection_id = old.connection_id,
                connection_id,
                "replaced existing connection"
            );
        }

        Registration {
            connection_id,
            receiver: rx,
            replaced,
        }
    }

    /// Remove the entry for `identity` only if it still belongs to `connection_id`.
    ///
    /// Uses `remove_if` so a superseded connection cannot evict its replacement.
    pub fn unregister(&self, identity: &Identity, connection_id: u64) -> bool {
        self.connections
            .remove_if(identity, |_, entry| entry.connection_id == connection_id)
            .is_some()
    }

    /// Queue an envelope for `identity`. Returns false when the identity is offline
    /// or its queue is full or closed.
    pub fn send(&self, identity: &Identity, envelope: ServerEnvelope) -> bool {
        let Some(entry) = self.connections.get(identity) else {
            return false;
        };
        match entry.sender.try_send(Outbound::Envelope(envelope)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    user_id = %identity,
                    error = %e,
                    "failed to send message to connection (channel full or closed)"
                );
                false
            }
        }
    }

    /// Queue an envelope for one specific connection of `identity`.
    pub fn send_to_connection(
        &self,
        identity: &Identity,
        connection_id: u64,
        envelope: ServerEnvelope,
    ) -> bool {
        match self.connections.get(identity) {
            Some(entry) if entry.connection_id == connection_id => entry
                .sender
                .try_send(Outbound::Envelope(envelope))
                .is_ok(),
            _ => false,
        }
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.connections.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every sender so each send loop emits a going-away close frame.
    pub fn shutdown_all(&self) {
        self.connections.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
