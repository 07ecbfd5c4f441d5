mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{spawn_relay, test_state, token_for, wait_online, ws_url};
use unme_client::{
    ChannelConfig, ChatMessage, ChatSession, HttpMessageStore, MessageStore, RealtimeChannel,
    SendOutcome, Session, StaticTokenProvider,
};
use unme_crypto::{decrypt, EncryptionKey, KeyStore};
use unme_relay::state::AppState;
use unme_shared::constants::MESSAGE_UNAVAILABLE;

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    chat: ChatSession,
    store: HttpMessageStore,
    channel: RealtimeChannel,
}

fn client(
    state: &AppState,
    addr: SocketAddr,
    identity: &str,
    peer: &str,
    shared_key: Option<&EncryptionKey>,
) -> Client {
    let session = Session::new(StaticTokenProvider::new(identity, token_for(state, identity)));
    let keys = Arc::new(KeyStore::open_in_memory().unwrap());
    if let Some(key) = shared_key {
        keys.import_key(&identity.into(), key).unwrap();
    }
    let channel = RealtimeChannel::new(session.clone(), keys, ChannelConfig::default());
    let store = HttpMessageStore::new(
        format!("http://{addr}"),
        session.clone(),
        Duration::from_millis(50),
    );
    let chat =
        ChatSession::open(channel.clone(), Arc::new(store.clone()), &session, peer).unwrap();
    Client {
        chat,
        store,
        channel,
    }
}

async fn wait_for_messages(chat: &ChatSession, check: impl Fn(&[ChatMessage]) -> bool) {
    let mut changes = chat.changes();
    tokio::time::timeout(WAIT, async {
        while !check(chat.messages().as_slice()) {
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("timeline never reached the expected state");
}

#[tokio::test]
async fn live_message_is_relayed_decrypted_and_acknowledged() {
    let state = test_state().await;
    let addr = spawn_relay(state.clone()).await;
    let shared = EncryptionKey::generate();
    let alice = client(&state, addr, "alice", "bob", Some(&shared));
    let bob = client(&state, addr, "bob", "alice", Some(&shared));

    alice.chat.connect(&ws_url(addr)).await.unwrap();
    bob.chat.connect(&ws_url(addr)).await.unwrap();
    wait_online(&state, "alice").await;
    wait_online(&state, "bob").await;

    let outcome = alice.chat.send_text("hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Live(_)));

    wait_for_messages(&bob.chat, |m| m.len() == 1).await;
    let received = bob.chat.messages()[0].clone();
    assert_eq!(received.content, "hello");
    assert!(received.decrypted);
    assert_eq!(received.sender_id.as_str(), "alice");
    assert_eq!(Some(received.id), outcome.id());

    wait_for_messages(&alice.chat, |m| m.len() == 1 && !m[0].pending).await;
    assert_eq!(alice.chat.messages()[0].timestamp, received.timestamp);

    // the relay stored ciphertext only
    let stored = alice.store.history(&"bob".into()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_encrypted);
    assert_ne!(stored[0].content, "hello");
    assert_eq!(decrypt(&stored[0].content, &shared).unwrap(), "hello");
}

#[tokio::test]
async fn offline_recipient_finds_message_in_history() {
    let state = test_state().await;
    let addr = spawn_relay(state.clone()).await;
    let shared = EncryptionKey::generate();
    let alice = client(&state, addr, "alice", "bob", Some(&shared));
    alice.chat.connect(&ws_url(addr)).await.unwrap();
    wait_online(&state, "alice").await;

    let outcome = alice.chat.send_text("are you there?").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Live(_)));
    wait_for_messages(&alice.chat, |m| m.len() == 1 && !m[0].pending).await;

    let bob = client(&state, addr, "bob", "alice", Some(&shared));
    bob.chat.connect(&ws_url(addr)).await.unwrap();
    wait_for_messages(&bob.chat, |m| m.len() == 1).await;
    assert_eq!(bob.chat.messages()[0].content, "are you there?");
}

#[tokio::test]
async fn send_without_connection_is_stored_for_later() {
    let state = test_state().await;
    let addr = spawn_relay(state.clone()).await;
    let shared = EncryptionKey::generate();
    let alice = client(&state, addr, "alice", "bob", Some(&shared));
    assert!(!alice.channel.is_connected());

    let outcome = alice.chat.send_text("sent while offline").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Stored(_)));
    assert!(!alice.chat.messages()[0].pending);

    let bob = client(&state, addr, "bob", "alice", Some(&shared));
    wait_for_messages(&bob.chat, |m| m.len() == 1).await;
    assert_eq!(bob.chat.messages()[0].content, "sent while offline");
    assert_eq!(Some(bob.chat.messages()[0].id), outcome.id());
}

#[tokio::test]
async fn recipient_without_the_key_sees_placeholder() {
    let state = test_state().await;
    let addr = spawn_relay(state.clone()).await;
    let alice = client(&state, addr, "alice", "bob", None);
    let bob = client(&state, addr, "bob", "alice", None);
    alice.chat.connect(&ws_url(addr)).await.unwrap();
    bob.chat.connect(&ws_url(addr)).await.unwrap();
    wait_online(&state, "bob").await;

    alice.chat.send_text("for my eyes only").await.unwrap();

    wait_for_messages(&bob.chat, |m| m.len() == 1).await;
    let received = bob.chat.messages()[0].clone();
    assert_eq!(received.content, MESSAGE_UNAVAILABLE);
    assert!(!received.decrypted);
    assert!(bob.channel.is_connected());
}

#[tokio::test]
async fn closing_a_session_unregisters_its_connection() {
    let state = test_state().await;
    let addr = spawn_relay(state.clone()).await;
    let alice = client(&state, addr, "alice", "bob", None);
    alice.chat.connect(&ws_url(addr)).await.unwrap();
    wait_online(&state, "alice").await;

    alice.chat.close();
    tokio::time::timeout(WAIT, async {
        while state.registry.is_online(&"alice".into()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay kept the closed connection registered");
}
