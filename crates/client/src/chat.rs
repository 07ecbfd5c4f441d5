//! Per-conversation orchestrator.
//!
//! Merges two eventually-consistent views of one conversation: envelopes
//! arriving on the realtime channel and snapshots from the message store's
//! live query. Entries are keyed by message id, so the optimistic local copy,
//! the relayed copy and the stored copy of one message collapse into a single
//! timeline entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use unme_crypto::{decrypt_or_placeholder, encrypt, CryptoError, EncryptionKey};
use unme_shared::api::message::{AppendMessageRequest, StoredMessage};
use unme_shared::api::ws::{ClientEnvelope, RelayedMessage, ServerEnvelope};
use unme_shared::ids::{ChatId, Identity, MessageId};
use unme_shared::time::now_millis;

use crate::channel::{ConnectionState, RealtimeChannel, Subscription};
use crate::error::ChannelError;
use crate::session::Session;
use crate::store::MessageStore;

/// One rendered timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: Identity,
    /// Plaintext, or the "message unavailable" placeholder.
    pub content: String,
    pub timestamp: i64,
    pub decrypted: bool,
    /// Sent locally, not yet acknowledged by the relay or the store.
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send after trimming.
    Skipped,
    /// Handed to the live channel.
    Live(MessageId),
    /// Channel unavailable; written directly to the message store.
    Stored(MessageId),
}

impl SendOutcome {
    pub fn id(&self) -> Option<MessageId> {
        match self {
            SendOutcome::Skipped => None,
            SendOutcome::Live(id) | SendOutcome::Stored(id) => Some(*id),
        }
    }
}

struct Timeline {
    entries: Mutex<HashMap<MessageId, ChatMessage>>,
    changes: watch::Sender<u64>,
}

impl Timeline {
    fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<MessageId, ChatMessage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v += 1);
    }

    /// Insert or merge. Locally known plaintext is never replaced by a
    /// placeholder, and a confirmed entry never goes back to pending.
    fn upsert(&self, incoming: ChatMessage) {
        {
            let mut entries = self.entries();
            match entries.get_mut(&incoming.id) {
                Some(existing) => {
                    if incoming.decrypted || !existing.decrypted {
                        existing.content = incoming.content;
                        existing.decrypted = incoming.decrypted;
                    }
                    if !incoming.pending {
                        existing.pending = false;
                        existing.timestamp = incoming.timestamp;
                    }
                }
                None => {
                    entries.insert(incoming.id, incoming);
                }
            }
        }
        self.notify();
    }

    fn confirm(&self, id: MessageId, timestamp: i64) {
        let changed = match self.entries().get_mut(&id) {
            Some(entry) => {
                entry.pending = false;
                entry.timestamp = timestamp;
                true
            }
            None => false,
        };
        if changed {
            self.notify();
        }
    }

    fn remove(&self, id: &MessageId) {
        if self.entries().remove(id).is_some() {
            self.notify();
        }
    }

    fn apply_snapshot(&self, snapshot: Vec<StoredMessage>, key: &EncryptionKey) {
        for stored in snapshot {
            let known_plaintext = self
                .entries()
                .get(&stored.id)
                .is_some_and(|entry| entry.decrypted && !entry.pending);
            if known_plaintext {
                continue;
            }
            let (content, decrypted) = if stored.is_encrypted {
                decrypt_or_placeholder(&stored.content, key)
            } else {
                (stored.content, true)
            };
            self.upsert(ChatMessage {
                id: stored.id,
                sender_id: stored.sender_id,
                content,
                timestamp: stored.timestamp,
                decrypted,
                pending: false,
            });
        }
    }

    fn sorted(&self) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self.entries().values().cloned().collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        messages
    }
}

fn relayed_entry(message: &RelayedMessage) -> ChatMessage {
    ChatMessage {
        id: message.id,
        sender_id: message.sender_id.clone(),
        content: message.content.clone(),
        timestamp: message.timestamp,
        decrypted: message.is_decrypted.unwrap_or(!message.is_encrypted),
        pending: false,
    }
}

/// One open conversation between the session's identity and `peer`.
///
/// Dropping the session (or calling [`close`](Self::close)) unregisters the
/// channel handler, stops the live query and disconnects the channel.
pub struct ChatSession {
    channel: RealtimeChannel,
    store: Arc<dyn MessageStore>,
    me: Identity,
    peer: Identity,
    chat_id: ChatId,
    key: EncryptionKey,
    timeline: Arc<Timeline>,
    subscription: Mutex<Option<Subscription>>,
    live_query: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Wire a conversation view to the channel and the store. Must be called
    /// from within a Tokio runtime.
    pub fn open(
        channel: RealtimeChannel,
        store: Arc<dyn MessageStore>,
        session: &Session,
        peer: impl Into<Identity>,
    ) -> Result<Self, ChannelError> {
        let me = session.identity().ok_or(CryptoError::KeyUnavailable)?;
        let peer = peer.into();
        if peer.is_empty() {
            return Err(ChannelError::Protocol("peer identity is empty".into()));
        }
        let key = channel.encryption_key()?;
        let chat_id = ChatId::for_pair(&me, &peer);
        let timeline = Arc::new(Timeline::new());

        let subscription = {
            let timeline = timeline.clone();
            let chat_id = chat_id.clone();
            channel.on_message(move |envelope| match envelope {
                ServerEnvelope::NewMessage { message } if message.chat_id == chat_id => {
                    timeline.upsert(relayed_entry(message));
                }
                ServerEnvelope::MessageDelivered {
                    message_id,
                    chat_id: delivered_chat,
                    timestamp,
                } if *delivered_chat == chat_id => {
                    timeline.confirm(*message_id, *timestamp);
                }
                ServerEnvelope::Error { code, message } => {
                    tracing::warn!(code, error = %message, "relay reported an error");
                }
                _ => {}
            })
        };

        let live_query = {
            let mut snapshots = store.subscribe(&peer);
            let timeline = timeline.clone();
            let key = key.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.recv().await {
                    timeline.apply_snapshot(snapshot, &key);
                }
            })
        };

        tracing::info!(chat_id = %chat_id, "chat session opened");
        Ok(Self {
            channel,
            store,
            me,
            peer,
            chat_id,
            key,
            timeline,
            subscription: Mutex::new(Some(subscription)),
            live_query: Mutex::new(Some(live_query)),
        })
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    /// Open the underlying channel.
    pub async fn connect(&self, url: &str) -> Result<(), ChannelError> {
        self.channel.connect(url).await
    }

    /// Send `text` to the peer.
    ///
    /// The optimistic entry is visible immediately. When the channel cannot
    /// take the message, the same ciphertext and id go to the store instead.
    /// If that write fails too the optimistic entry is removed and the error
    /// returned.
    pub async fn send_text(&self, text: &str) -> Result<SendOutcome, ChannelError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Skipped);
        }
        let id = MessageId::new();
        let content = encrypt(text, &self.key)?;

        self.timeline.upsert(ChatMessage {
            id,
            sender_id: self.me.clone(),
            content: text.to_string(),
            timestamp: now_millis(),
            decrypted: true,
            pending: true,
        });

        let envelope = ClientEnvelope::Message {
            recipient_id: self.peer.clone(),
            content: content.clone(),
            is_encrypted: true,
            chat_id: Some(self.chat_id.clone()),
            id: Some(id),
        };
        match self.channel.send(envelope) {
            Ok(true) => return Ok(SendOutcome::Live(id)),
            Ok(false) => {}
            Err(e) => {
                self.timeline.remove(&id);
                return Err(e);
            }
        }

        tracing::info!(chat_id = %self.chat_id, message_id = %id, "channel unavailable, writing to store");
        let request = AppendMessageRequest {
            id: Some(id),
            content,
            is_encrypted: true,
        };
        match self.store.append(&self.peer, request).await {
            Ok(stored) => {
                self.timeline.confirm(id, stored.timestamp);
                Ok(SendOutcome::Stored(id))
            }
            Err(e) => {
                tracing::error!(chat_id = %self.chat_id, error = %e, "fallback write failed");
                self.timeline.remove(&id);
                Err(e.into())
            }
        }
    }

    /// The rendered timeline, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.timeline.sorted()
    }

    /// Ticks on every timeline change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.timeline.changes.subscribe()
    }

    pub fn status(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    /// Tear the view down. Idempotent.
    pub fn close(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let live_query = self
            .live_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(task) = live_query {
            task.abort();
        }
        self.channel.disconnect();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}
