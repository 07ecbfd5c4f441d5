#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use unme_relay::config::ServerConfig;
use unme_relay::db::connect_in_memory;
use unme_relay::jwt::JwtService;
use unme_relay::router::build_router;
use unme_relay::state::AppState;
use unme_shared::api::ws::{ClientEnvelope, ServerEnvelope};
use unme_shared::ids::Identity;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "integration-secret-integration-secret";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        jwt_secret: TEST_SECRET.to_string(),
        ..ServerConfig::default()
    }
}

pub async fn test_state() -> AppState {
    let config = test_config();
    let jwt = JwtService::new(&config).unwrap();
    AppState::new(connect_in_memory().await.unwrap(), config, jwt)
}

pub fn token_for(state: &AppState, identity: &str) -> String {
    state.jwt.issue_token(&Identity::from(identity)).unwrap()
}

/// Serve the relay on an ephemeral loopback port.
pub async fn spawn_relay(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

/// Open a socket for `identity` and wait until the relay has registered it.
pub async fn connect_as(state: &AppState, addr: SocketAddr, identity: &str) -> WsStream {
    let url = format!("{}?token={}", ws_url(addr), token_for(state, identity));
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    wait_online(state, identity).await;
    ws
}

pub async fn wait_online(state: &AppState, identity: &str) {
    let identity = Identity::from(identity);
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !state.registry.is_online(&identity) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never registered");
}

pub async fn send_envelope(ws: &mut WsStream, envelope: &ClientEnvelope) {
    let json = serde_json::to_string(envelope).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Next server envelope, skipping control frames.
pub async fn next_envelope(ws: &mut WsStream) -> ServerEnvelope {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert nothing arrives within a short window.
pub async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}
