//! Local loopback harness: both participants' sessions over one
//! in-process store. Lines typed on stdin send as user one; `/two`
//! sends as user two; `/quit` signs both out.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use tandem_session::{ChatSession, PairConfig, PresenceTracker, SoundPlayer};
use tandem_store::{Store, schema};
use tandem_types::{SessionEvent, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug".into()),
        )
        .init();

    // Config
    let user_one = UserId::new(env_or("TANDEM_USER_ONE", "ember"));
    let user_two = UserId::new(env_or("TANDEM_USER_TWO", "wren"));
    let name_one = env_or("TANDEM_NAME_ONE", "Ember");
    let name_two = env_or("TANDEM_NAME_TWO", "Wren");
    let pair = PairConfig::new(user_one.clone(), user_two.clone());

    // Store + schema stamp + profiles
    let store = Store::new();
    schema::ensure_version(&store).await?;
    store
        .put(&schema::display_name(&user_one), json!(name_one))
        .await?;
    store
        .put(&schema::display_name(&user_two), json!(name_two))
        .await?;

    // Presence for both sides
    let mut presence_one = PresenceTracker::new(store.clone(), user_one.clone());
    let mut presence_two = PresenceTracker::new(store.clone(), user_two.clone());
    presence_one.start();
    presence_two.start();

    // Both surfaces count as foregrounded in the loopback harness.
    let (_surface_tx, surface_rx) = watch::channel(true);

    let (sound_one, cues_one) = SoundPlayer::new();
    let (sound_two, cues_two) = SoundPlayer::new();
    spawn_cue_logger(&name_one, cues_one);
    spawn_cue_logger(&name_two, cues_two);

    let (session_one, events_one) = ChatSession::start(
        store.clone(),
        &pair,
        user_one.clone(),
        surface_rx.clone(),
        sound_one,
    )
    .await;
    let (session_two, events_two) = ChatSession::start(
        store.clone(),
        &pair,
        user_two.clone(),
        surface_rx,
        sound_two,
    )
    .await;
    spawn_event_logger(&name_one, events_one);
    spawn_event_logger(&name_two, events_two);

    info!("Tandem loopback up: {user_one} <-> {user_two}");
    info!("Type to chat as {name_one}; '/two <text>' chats as {name_two}; '/quit' exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        let result = if let Some(rest) = line.strip_prefix("/two ") {
            session_two.send_message(rest).await
        } else if !line.is_empty() {
            session_one.send_message(line).await
        } else {
            continue;
        };
        if let Err(e) = result {
            warn!("Send failed: {e}");
        }
    }

    presence_one.sign_out().await;
    presence_two.sign_out().await;
    info!("Signed out, bye");
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn spawn_cue_logger(who: &str, mut cues: mpsc::UnboundedReceiver<tandem_session::SoundCue>) {
    let who = who.to_string();
    tokio::spawn(async move {
        while let Some(cue) = cues.recv().await {
            info!("[{who}] sound: {cue:?}");
        }
    });
}

fn spawn_event_logger(who: &str, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let who = who.to_string();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Ready { partner_name, room_id, .. } => {
                    info!("[{who}] ready: chatting with {partner_name} in {room_id}");
                }
                SessionEvent::UnknownPartner { user_id } => {
                    warn!("[{who}] unknown partner for {user_id}; chat unavailable");
                }
                SessionEvent::MessagesUpdated { messages } => {
                    if let Some(last) = messages.last() {
                        info!(
                            "[{who}] view: {} messages, latest from {}: {:?} ({})",
                            messages.len(),
                            last.sender_id,
                            last.text,
                            last.status.as_str(),
                        );
                    }
                }
                SessionEvent::NewMessage { sender_id, text, .. } => {
                    info!("[{who}] new message from {sender_id}: {text:?}");
                }
                SessionEvent::PartnerPresence { presence } => {
                    let now = chrono::Utc::now().timestamp_millis();
                    info!("[{who}] partner presence: {}", presence.last_seen_label(now));
                }
                SessionEvent::FeedError { detail } => {
                    warn!("[{who}] feed error: {detail}");
                }
                SessionEvent::FeedRecovered => {
                    info!("[{who}] feed recovered");
                }
            }
        }
    });
}
