pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod router;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod ws;
