use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::jwt::JwtService;
use crate::ws::clock::MessageClock;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via Axum's State extractor.
///
/// `SqlitePool` is internally Arc-wrapped. Everything else sits behind an
/// `Arc` so cloning `AppState` is cheap.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ServerConfig>,
    pub jwt: Arc<JwtService>,
    pub registry: Arc<ConnectionRegistry>,
    pub clock: Arc<MessageClock>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServerConfig, jwt: JwtService) -> Self {
        Self {
            db,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            registry: Arc::new(ConnectionRegistry::new()),
            clock: Arc::new(MessageClock::new()),
        }
    }
}
