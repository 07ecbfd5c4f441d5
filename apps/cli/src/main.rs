//! `unme-chat`: one encrypted conversation in the terminal.
//!
//! Chat output goes to stdout, logs to stderr.

use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use unme_client::{
    ChannelError, ChatMessage, ChatSession, ClientConfig, ConnectionState, HttpMessageStore,
    RealtimeChannel, SendOutcome, Session, StaticTokenProvider,
};
use unme_crypto::KeyStore;
use unme_shared::ids::Identity;

#[derive(Parser, Debug)]
#[command(name = "unme-chat")]
#[command(version, about = "End-to-end encrypted chat with one peer", long_about = None)]
struct Args {
    /// Identity of the person to talk to
    #[arg(long)]
    peer: String,

    /// Bearer token issued by the auth provider
    #[arg(long, env = "UNME_TOKEN", hide_env_values = true)]
    token: String,

    /// Your own identity (the token's subject)
    #[arg(long, env = "UNME_IDENTITY")]
    identity: String,
}

fn banner(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connected => "-- connected --",
        ConnectionState::Connecting => "-- connecting --",
        ConnectionState::Disconnected => "-- disconnected: messages are saved and delivered later --",
    }
}

fn render(message: &ChatMessage, me: &Identity) -> String {
    let time = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_default();
    let who = if message.sender_id == *me {
        "you"
    } else {
        message.sender_id.as_str()
    };
    let marker = if message.pending { " (sending)" } else { "" };
    format!("[{time}] {who}: {}{marker}", message.content)
}

/// Print timeline entries and status changes as they happen.
async fn render_loop(chat: Arc<ChatSession>, me: Identity) {
    let mut changes = chat.changes();
    let mut status = chat.watch_status();
    let mut printed: HashSet<_> = HashSet::new();
    println!("-- chatting with {} (/quit to leave) --", chat.peer());
    println!("{}", banner(*status.borrow_and_update()));
    loop {
        for message in chat.messages() {
            if !message.pending && printed.insert(message.id) {
                println!("{}", render(&message, &me));
            }
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                println!("{}", banner(*status.borrow_and_update()));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = ClientConfig::load()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let me = Identity::from(args.identity);
    let session = Session::new(StaticTokenProvider::new(me.clone(), args.token));
    let keys = Arc::new(KeyStore::open(&config.key_store_path)?);
    let channel = RealtimeChannel::new(session.clone(), keys, config.channel_config());
    let store = Arc::new(HttpMessageStore::new(
        config.api_url.clone(),
        session.clone(),
        config.poll_interval(),
    ));
    let chat = Arc::new(ChatSession::open(channel, store, &session, args.peer)?);

    match chat.connect(&config.ws_url).await {
        Ok(()) => {}
        Err(ChannelError::Connection(e)) => {
            tracing::warn!(error = %e, "relay unreachable, retrying in the background");
        }
        Err(e) => return Err(e.into()),
    }

    let renderer = tokio::spawn(render_loop(chat.clone(), me));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }
        match chat.send_text(&line).await {
            Ok(SendOutcome::Stored(_)) => {
                tracing::info!("offline: message saved for later delivery");
            }
            Ok(_) => {}
            Err(e) => eprintln!("send failed: {e}"),
        }
    }

    renderer.abort();
    chat.close();
    Ok(())
}
