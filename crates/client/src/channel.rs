//! Reconnecting realtime channel to the relay.
//!
//! One socket per channel. Outbound `message` envelopes are encrypted before
//! they are queued; inbound `newMessage` envelopes are decrypted before any
//! handler sees them. An unexpected close starts a bounded reconnect loop
//! (fixed interval, attempt counter reset on every successful open).
//!
//! Every explicit `connect`/`disconnect` bumps a generation counter. Background
//! tasks carry the generation they were started under and stand down as soon
//! as it no longer matches, so a stale reader or reconnect loop can never
//! resurrect a channel the owner already tore down.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use unme_crypto::{
    decrypt, decrypt_or_placeholder, encrypt, CryptoError, EncryptionKey, KeyStore,
};
use unme_shared::api::ws::{ClientEnvelope, ServerEnvelope};
use unme_shared::constants::TOKEN_QUERY_PARAM;
use unme_shared::ids::{ChatId, MessageId};

use crate::error::ChannelError;
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Arc<dyn Fn(&ServerEnvelope) + Send + Sync>;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    /// Frames that may wait for the socket writer before `send` reports false.
    /// Zero is treated as one.
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Slot {
    url: Option<String>,
    key: Option<EncryptionKey>,
    outbound: Option<mpsc::Sender<Message>>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    session: Session,
    key_store: Arc<KeyStore>,
    config: ChannelConfig,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_handler_id: AtomicU64,
    generation: AtomicU64,
    attempts: AtomicU32,
    exhausted: AtomicBool,
}

/// Handle to one realtime connection. Clones share the same connection.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

/// Registration returned by [`RealtimeChannel::on_message`].
///
/// The handler stays registered until this is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handlers().retain(|(id, _)| *id != self.id);
        }
    }
}

impl RealtimeChannel {
    pub fn new(session: Session, key_store: Arc<KeyStore>, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                session,
                key_store,
                config,
                state,
                slot: Mutex::new(Slot::default()),
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                exhausted: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// True once the reconnect loop gave up. Cleared by the next `connect`.
    pub fn reconnect_exhausted(&self) -> bool {
        self.inner.exhausted.load(Ordering::SeqCst)
    }

    /// The session's encryption key, created on first use.
    pub fn encryption_key(&self) -> Result<EncryptionKey, ChannelError> {
        let identity = self.inner.session.identity();
        Ok(self.inner.key_store.get_or_create_key(identity.as_ref())?)
    }

    /// Open the channel to `url`. No-op when already connected.
    ///
    /// A failed open returns [`ChannelError::Connection`] and leaves the
    /// reconnect loop running in the background. Token problems return
    /// [`ChannelError::AuthToken`] and are not retried.
    pub async fn connect(&self, url: &str) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Ok(());
        }
        let key = self.encryption_key()?;

        let generation = {
            let mut slot = self.inner.slot();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            slot.abort_tasks();
            slot.outbound = None;
            slot.url = Some(url.to_string());
            slot.key = Some(key);
            generation
        };
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.exhausted.store(false, Ordering::SeqCst);
        self.inner.state.send_replace(ConnectionState::Connecting);

        match self.inner.open(generation).await {
            Ok(()) => Ok(()),
            Err(e @ ChannelError::Connection(_)) => {
                tracing::warn!(error = %e, "initial connect failed, scheduling reconnect");
                self.inner.set_disconnected(generation);
                self.inner.schedule_reconnect(generation);
                Err(e)
            }
            Err(e) => {
                tracing::error!(error = %e, "connect failed");
                self.inner.set_disconnected(generation);
                Err(e)
            }
        }
    }

    /// Queue an envelope for the relay.
    ///
    /// Returns `Ok(false)` without touching channel state when not connected
    /// or when the outbound queue is unavailable. A plaintext `message` is
    /// encrypted and marked encrypted first. A `message` already flagged
    /// encrypted must decrypt under the session key; otherwise it is rejected
    /// with [`ChannelError::Crypto`] and nothing is sent.
    pub fn send(&self, envelope: ClientEnvelope) -> Result<bool, ChannelError> {
        if !self.is_connected() {
            return Ok(false);
        }
        let (outbound, key) = {
            let slot = self.inner.slot();
            match (&slot.outbound, &slot.key) {
                (Some(tx), Some(key)) => (tx.clone(), key.clone()),
                _ => return Ok(false),
            }
        };

        let envelope = match envelope {
            ClientEnvelope::Message {
                recipient_id,
                content,
                is_encrypted,
                chat_id,
                id,
            } => {
                let content = if is_encrypted {
                    // pre-encrypted content must be ours, or plaintext could
                    // leave flagged as ciphertext
                    decrypt(&content, &key)?;
                    content
                } else {
                    encrypt(&content, &key)?
                };
                let chat_id = chat_id.or_else(|| {
                    self.inner
                        .session
                        .identity()
                        .map(|me| ChatId::for_pair(&me, &recipient_id))
                });
                ClientEnvelope::Message {
                    recipient_id,
                    content,
                    is_encrypted: true,
                    chat_id,
                    id: Some(id.unwrap_or_else(MessageId::new)),
                }
            }
            other => other,
        };

        let json = serde_json::to_string(&envelope)
            .map_err(|e| ChannelError::Protocol(format!("failed to encode envelope: {e}")))?;
        match outbound.try_send(Message::Text(json.into())) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "outbound queue unavailable");
                Ok(false)
            }
        }
    }

    /// Register `handler` for every inbound envelope. Handlers run in
    /// registration order.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerEnvelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers().push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Close the socket and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let was = self.state();
        {
            let mut slot = self.inner.slot();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            // dropping the sender lets the writer send a close frame
            slot.outbound = None;
            slot.abort_tasks();
        }
        self.inner.exhausted.store(false, Ordering::SeqCst);
        self.inner.state.send_replace(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            tracing::info!("channel disconnected");
        }
    }
}

impl Slot {
    fn abort_tasks(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(u64, Handler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_disconnected(&self, generation: u64) {
        if self.is_current(generation) {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }

    /// One socket-open attempt: fetch a token, handshake, send `authenticate`,
    /// then hand the socket to the reader and writer tasks.
    async fn open(self: &Arc<Self>, generation: u64) -> Result<(), ChannelError> {
        let (url, key) = {
            let slot = self.slot();
            match (&slot.url, &slot.key) {
                (Some(url), Some(key)) => (url.clone(), key.clone()),
                _ => return Err(ChannelError::Protocol("channel has no endpoint".into())),
            }
        };

        let token = self
            .session
            .token()
            .await
            .map_err(|e| ChannelError::AuthToken(e.to_string()))?;
        let request_url = url_with_token(&url, &token)?;

        let (ws, _) = tokio_tungstenite::connect_async(request_url.as_str())
            .await
            .map_err(handshake_error)?;
        let (mut write, read) = ws.split();

        let auth = serde_json::to_string(&ClientEnvelope::Authenticate { token })
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(auth.into()))
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let mut write = Some(write);
        {
            let mut slot = self.slot();
            if self.is_current(generation) {
                slot.outbound = Some(tx);
                self.attempts.store(0, Ordering::SeqCst);
                self.state.send_replace(ConnectionState::Connected);
                if let Some(write) = write.take() {
                    tokio::spawn(write_loop(write, rx));
                }
                let reader = tokio::spawn(read_loop(read, Arc::downgrade(self), key, generation));
                if let Some(old) = slot.reader.replace(reader) {
                    old.abort();
                }
            }
        }
        if let Some(mut write) = write {
            // disconnect() or a newer connect() won the race
            let _ = write.send(Message::Close(None)).await;
            return Err(ChannelError::Connection("connect superseded".into()));
        }
        tracing::info!(url = %url, "channel connected");
        Ok(())
    }

    fn connection_lost(self: &Arc<Self>, generation: u64) {
        {
            let mut slot = self.slot();
            if !self.is_current(generation) {
                return;
            }
            slot.outbound = None;
            slot.reader = None;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::warn!("connection closed unexpectedly");
        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let mut slot = self.slot();
        if !self.is_current(generation) {
            return;
        }
        let handle = tokio::spawn(reconnect_loop(Arc::downgrade(self), generation));
        if let Some(old) = slot.reconnect.replace(handle) {
            old.abort();
        }
    }

    fn dispatch(&self, text: &str, key: &EncryptionKey) {
        let mut envelope: ServerEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        if let ServerEnvelope::NewMessage { message } = &mut envelope {
            if message.is_encrypted {
                let (content, decrypted) = decrypt_or_placeholder(&message.content, key);
                message.content = content;
                message.is_decrypted = Some(decrypted);
            }
        }

        // Snapshot so handlers may (un)subscribe while being called.
        let handlers: Vec<Handler> = self.handlers().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(&envelope);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        slot.outbound = None;
        slot.abort_tasks();
    }
}

async fn write_loop(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            tracing::debug!(error = %e, "websocket write failed");
            return;
        }
    }
    let _ = write.send(Message::Close(None)).await;
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    inner: Weak<Inner>,
    key: EncryptionKey,
    generation: u64,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.dispatch(text.as_str(), &key);
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "relay closed the connection");
                break;
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("dropping binary frame");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation);
    }
}

async fn reconnect_loop(inner: Weak<Inner>, generation: u64) {
    loop {
        let interval = {
            let Some(this) = inner.upgrade() else {
                return;
            };
            if !this.is_current(generation) {
                return;
            }
            let attempts = this.attempts.load(Ordering::SeqCst);
            if attempts >= this.config.max_reconnect_attempts {
                this.exhausted.store(true, Ordering::SeqCst);
                tracing::warn!(attempts, "reconnect attempts exhausted");
                return;
            }
            this.attempts.store(attempts + 1, Ordering::SeqCst);
            tracing::info!(attempt = attempts + 1, "scheduling reconnect");
            this.config.reconnect_interval
        };

        tokio::time::sleep(interval).await;

        let Some(this) = inner.upgrade() else {
            return;
        };
        if !this.is_current(generation) {
            return;
        }
        this.state.send_replace(ConnectionState::Connecting);
        match this.open(generation).await {
            Ok(()) => return,
            Err(ChannelError::AuthToken(e)) => {
                tracing::error!(error = %e, "reconnect rejected, not retrying");
                this.exhausted.store(true, Ordering::SeqCst);
                this.set_disconnected(generation);
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "reconnect attempt failed");
                this.set_disconnected(generation);
            }
        }
    }
}

/// Append the token as a query parameter, keeping any existing query.
fn url_with_token(url: &str, token: &str) -> Result<reqwest::Url, ChannelError> {
    let mut url = reqwest::Url::parse(url)
        .map_err(|e| ChannelError::Connection(format!("invalid relay url {url}: {e}")))?;
    url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    Ok(url)
}

fn handshake_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            ChannelError::AuthToken("relay rejected the token".into())
        }
        other => ChannelError::Connection(other.to_string()),
    }
}
