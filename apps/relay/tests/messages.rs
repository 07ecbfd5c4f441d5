mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt; // for `oneshot`

use unme_relay::router::build_router;
use unme_relay::state::AppState;
use unme_shared::api::message::{ConversationResponse, StoredMessage};
use unme_shared::ids::MessageId;

fn authed(state: &AppState, identity: &str, method: Method, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", common::token_for(state, identity)),
        )
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_history_requires_bearer_token() {
    let app = build_router(common::test_state().await);
    let request = Request::builder()
        .uri("/api/conversations/bob/messages")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_history_rejects_invalid_token() {
    let app = build_router(common::test_state().await);
    let request = Request::builder()
        .uri("/api/conversations/bob/messages")
        .header(header::AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_append_then_history_visible_to_both_participants() {
    let state = common::test_state().await;
    let app = build_router(state.clone());
    let id = MessageId::new();

    let body = serde_json::json!({
        "id": id.to_string(),
        "content": "00112233445566778899aabbccddeeff:abcdef",
        "isEncrypted": true,
    });
    let response = app
        .clone()
        .oneshot(authed(
            &state,
            "alice",
            Method::POST,
            "/api/conversations/bob/messages",
            Body::from(body.to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored: StoredMessage = body_json(response).await;
    assert_eq!(stored.id, id);
    assert_eq!(stored.chat_id.as_str(), "alice_bob");

    let response = app
        .oneshot(authed(
            &state,
            "bob",
            Method::GET,
            "/api/conversations/alice/messages",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history: Vec<StoredMessage> = body_json(response).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, id);
    assert_eq!(history[0].sender_id.as_str(), "alice");
    assert!(history[0].is_encrypted);
}

#[tokio::test]
async fn test_append_same_id_twice_returns_200_with_original() {
    let state = common::test_state().await;
    let app = build_router(state.clone());
    let body = serde_json::json!({
        "id": MessageId::new().to_string(),
        "content": "hello",
        "isEncrypted": false,
    })
    .to_string();

    let first = app
        .clone()
        .oneshot(authed(&state, "alice", Method::POST, "/api/conversations/bob/messages", Body::from(body.clone())))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: StoredMessage = body_json(first).await;

    let second = app
        .oneshot(authed(&state, "alice", Method::POST, "/api/conversations/bob/messages", Body::from(body)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second: StoredMessage = body_json(second).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_append_empty_content_is_400() {
    let state = common::test_state().await;
    let app = build_router(state.clone());
    let body = serde_json::json!({ "content": "", "isEncrypted": false }).to_string();
    let response = app
        .oneshot(authed(&state, "alice", Method::POST, "/api/conversations/bob/messages", Body::from(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conversation_404_until_first_message() {
    let state = common::test_state().await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(authed(&state, "alice", Method::GET, "/api/conversations/bob", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = serde_json::json!({ "content": "hi there", "isEncrypted": false }).to_string();
    app.clone()
        .oneshot(authed(&state, "bob", Method::POST, "/api/conversations/alice/messages", Body::from(body)))
        .await
        .unwrap();

    let response = app
        .oneshot(authed(&state, "alice", Method::GET, "/api/conversations/bob", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let chat: ConversationResponse = body_json(response).await;
    assert_eq!(chat.id.as_str(), "alice_bob");
    let last = chat.last_message.unwrap();
    assert_eq!(last.content, "hi there");
    assert_eq!(last.sender_id.as_str(), "bob");
}

#[tokio::test]
async fn test_encrypted_last_message_preview_is_placeholder() {
    let state = common::test_state().await;
    let app = build_router(state.clone());
    let body = serde_json::json!({ "content": "aa:bb", "isEncrypted": true }).to_string();
    app.clone()
        .oneshot(authed(&state, "alice", Method::POST, "/api/conversations/bob/messages", Body::from(body)))
        .await
        .unwrap();

    let response = app
        .oneshot(authed(&state, "bob", Method::GET, "/api/conversations/alice", Body::empty()))
        .await
        .unwrap();
    let chat: ConversationResponse = body_json(response).await;
    assert_eq!(chat.last_message.unwrap().content, "[Encrypted message]");
}
