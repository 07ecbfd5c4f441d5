//! Client side of the unme messaging transport: the session context, the
//! reconnecting realtime channel, the durable message-store collaborator and
//! the per-conversation orchestrator built on top of them.

pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use channel::{ChannelConfig, ConnectionState, RealtimeChannel, Subscription};
pub use chat::{ChatMessage, ChatSession, SendOutcome};
pub use config::ClientConfig;
pub use error::{ChannelError, StoreError};
pub use session::{AuthProvider, Session, StaticTokenProvider};
pub use store::{HttpMessageStore, MemoryMessageStore, MessageStore};
