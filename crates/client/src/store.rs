//! Durable message-store collaborator: conversation history, the direct
//! write used when the live channel is down, and a live query that pushes
//! history snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use unme_shared::api::message::{AppendMessageRequest, StoredMessage};
use unme_shared::ids::{ChatId, Identity, MessageId};
use unme_shared::time::now_millis;

use crate::error::StoreError;
use crate::session::Session;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 8;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Full history with `peer`, oldest first.
    async fn history(&self, peer: &Identity) -> Result<Vec<StoredMessage>, StoreError>;

    /// Write a message to the conversation with `peer` without live delivery.
    async fn append(
        &self,
        peer: &Identity,
        request: AppendMessageRequest,
    ) -> Result<StoredMessage, StoreError>;

    /// Live query: the receiver gets the current history and then a new
    /// snapshot whenever it changes. Dropping the receiver ends the query.
    /// Must be called from within a Tokio runtime.
    fn subscribe(&self, peer: &Identity) -> mpsc::Receiver<Vec<StoredMessage>>;
}

/// Store backed by the relay's REST routes. The live query polls.
#[derive(Clone)]
pub struct HttpMessageStore {
    client: reqwest::Client,
    api_url: String,
    session: Session,
    poll_interval: Duration,
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl HttpMessageStore {
    /// `poll_interval` is clamped to at least one millisecond.
    pub fn new(api_url: impl Into<String>, session: Session, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            session,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    fn messages_url(&self, peer: &Identity) -> Result<reqwest::Url, StoreError> {
        if peer.is_empty() {
            return Err(StoreError::Invalid("peer identity is empty".into()));
        }
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .extend(["api", "conversations", peer.as_str(), "messages"]);
        Ok(url)
    }

    async fn token(&self) -> Result<String, StoreError> {
        self.session
            .token()
            .await
            .map_err(|e| StoreError::Unauthorized(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn history(&self, peer: &Identity) -> Result<Vec<StoredMessage>, StoreError> {
        let url = self.messages_url(peer)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token().await?)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn append(
        &self,
        peer: &Identity,
        request: AppendMessageRequest,
    ) -> Result<StoredMessage, StoreError> {
        let url = self.messages_url(peer)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token().await?)
            .json(&request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    fn subscribe(&self, peer: &Identity) -> mpsc::Receiver<Vec<StoredMessage>> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let store = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.poll_interval);
            let mut last: Option<Vec<StoredMessage>> = None;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tx.closed() => return,
                }
                match store.history(&peer).await {
                    Ok(snapshot) => {
                        if last.as_ref() == Some(&snapshot) {
                            continue;
                        }
                        if tx.send(snapshot.clone()).await.is_err() {
                            return;
                        }
                        last = Some(snapshot);
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "history poll failed");
                    }
                }
            }
        });
        rx
    }
}

struct Shared {
    chats: Mutex<HashMap<ChatId, Vec<StoredMessage>>>,
    version: watch::Sender<u64>,
}

/// In-process store. Handles made with [`for_identity`](Self::for_identity)
/// share storage, so two participants can talk through one instance.
#[derive(Clone)]
pub struct MemoryMessageStore {
    owner: Identity,
    shared: Arc<Shared>,
}

impl MemoryMessageStore {
    pub fn new(owner: impl Into<Identity>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            owner: owner.into(),
            shared: Arc::new(Shared {
                chats: Mutex::new(HashMap::new()),
                version,
            }),
        }
    }

    /// A handle over the same storage acting for another participant.
    pub fn for_identity(&self, owner: impl Into<Identity>) -> Self {
        Self {
            owner: owner.into(),
            shared: self.shared.clone(),
        }
    }

    fn chats(&self) -> MutexGuard<'_, HashMap<ChatId, Vec<StoredMessage>>> {
        self.shared
            .chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a message as if another writer had stored it.
    pub fn insert(&self, message: StoredMessage) {
        {
            let mut chats = self.chats();
            let messages = chats.entry(message.chat_id.clone()).or_default();
            if messages.iter().any(|m| m.id == message.id) {
                return;
            }
            messages.push(message);
        }
        self.shared.version.send_modify(|v| *v += 1);
    }

    fn snapshot(&self, chat_id: &ChatId) -> Vec<StoredMessage> {
        let mut messages = self.chats().get(chat_id).cloned().unwrap_or_default();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        messages
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn history(&self, peer: &Identity) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.snapshot(&ChatId::for_pair(&self.owner, peer)))
    }

    async fn append(
        &self,
        peer: &Identity,
        request: AppendMessageRequest,
    ) -> Result<StoredMessage, StoreError> {
        if peer.is_empty() || request.content.is_empty() {
            return Err(StoreError::Invalid("peer and content are required".into()));
        }
        let chat_id = ChatId::for_pair(&self.owner, peer);
        let id = request.id.unwrap_or_else(MessageId::new);
        if let Some(existing) = self
            .chats()
            .get(&chat_id)
            .and_then(|messages| messages.iter().find(|m| m.id == id).cloned())
        {
            return Ok(existing);
        }
        let stored = StoredMessage {
            id,
            chat_id,
            sender_id: self.owner.clone(),
            content: request.content,
            is_encrypted: request.is_encrypted,
            timestamp: now_millis(),
            read: false,
        };
        self.insert(stored.clone());
        Ok(stored)
    }

    fn subscribe(&self, peer: &Identity) -> mpsc::Receiver<Vec<StoredMessage>> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let store = self.clone();
        let chat_id = ChatId::for_pair(&self.owner, peer);
        let mut version = self.shared.version.subscribe();
        tokio::spawn(async move {
            loop {
                version.mark_unchanged();
                if tx.send(store.snapshot(&chat_id)).await.is_err() {
                    return;
                }
                tokio::select! {
                    changed = version.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tx.closed() => return,
                }
            }
        });
        rx
    }
}
