#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use unme_client::{ChannelConfig, RealtimeChannel, Session, StaticTokenProvider};
use unme_crypto::KeyStore;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A scripted stand-in for the relay: accepts sockets and hands each one to
/// the test together with the token from the upgrade request.
pub struct FakeRelay {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<FakeConnection>,
}

pub struct FakeConnection {
    pub token: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Every upgrade is answered with HTTP 401.
    pub async fn rejecting() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(reject: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let token = Arc::new(Mutex::new(None));
                    let seen = token.clone();
                    let callback = move |req: &Request, resp: Response| {
                        *seen.lock().unwrap() = token_from_uri(req.uri());
                        if reject {
                            let body: ErrorResponse = http::Response::builder()
                                .status(http::StatusCode::UNAUTHORIZED)
                                .body(Some("Invalid authentication token".to_string()))
                                .unwrap();
                            return Err(body);
                        }
                        Ok(resp)
                    };
                    if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                        let token = token.lock().unwrap().clone();
                        let _ = tx.send(FakeConnection { token, ws });
                    }
                });
            }
        });
        Self {
            url: format!("ws://{addr}/ws"),
            accepted,
        }
    }

    pub async fn accept(&mut self) -> FakeConnection {
        tokio::time::timeout(RECV_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("relay stopped")
    }

    pub async fn assert_no_connection(&mut self, window: Duration) {
        let result = tokio::time::timeout(window, self.accepted.recv()).await;
        assert!(result.is_err(), "unexpected connection");
    }
}

fn token_from_uri(uri: &http::Uri) -> Option<String> {
    let url = reqwest::Url::parse(&format!("ws://relay{uri}")).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == "token")
        .map(|(_, value)| value.into_owned())
}

impl FakeConnection {
    /// Next text frame as JSON, skipping control frames.
    pub async fn next_json(&mut self) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
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

    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Wait for the client to close the socket.
    pub async fn expect_closed(&mut self) {
        let closed = tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client never closed the socket");
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn fast_config() -> ChannelConfig {
    ChannelConfig {
        max_reconnect_attempts: 3,
        reconnect_interval: Duration::from_millis(50),
        ..ChannelConfig::default()
    }
}

pub fn channel_for(provider: StaticTokenProvider, config: ChannelConfig) -> RealtimeChannel {
    RealtimeChannel::new(
        Session::new(provider),
        Arc::new(KeyStore::open_in_memory().unwrap()),
        config,
    )
}

/// Poll `condition` until it holds or the receive timeout passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Accepts TCP connections but never answers the WebSocket handshake, so a
/// channel pointed at it stays `Connecting`.
pub struct StalledRelay {
    pub url: String,
    task: tokio::task::JoinHandle<()>,
}

impl StalledRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { url, task }
    }
}

impl Drop for StalledRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}
