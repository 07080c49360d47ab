//! End-to-end session flows over the in-process store.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

use tandem_session::{ChatSession, PairConfig, SessionError, SoundCue, SoundPlayer};
use tandem_store::{Store, schema};
use tandem_types::{MessageId, RoomId, SessionEvent, UserId};

fn ember() -> UserId {
    UserId::from("ember")
}

fn wren() -> UserId {
    UserId::from("wren")
}

fn pair() -> PairConfig {
    PairConfig::new(ember(), wren())
}

fn room() -> RoomId {
    RoomId::for_pair(&ember(), &wren())
}

async fn seed_profiles(store: &Store) {
    store
        .put(&schema::display_name(&ember()), json!("Ember"))
        .await
        .unwrap();
    store
        .put(&schema::display_name(&wren()), json!("Wren"))
        .await
        .unwrap();
}

async fn seed_message(store: &Store, id: &str, sender: &UserId, text: &str, status: &str) {
    store
        .put(
            &schema::message(&room(), &MessageId::from(id)),
            json!({
                "text": text,
                "senderId": sender.as_str(),
                "timestamp": { ".sv": "timestamp" },
                "status": status,
                "isEdited": false,
            }),
        )
        .await
        .unwrap();
}

struct Harness {
    session: ChatSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cues: mpsc::UnboundedReceiver<SoundCue>,
    _surface: watch::Sender<bool>,
}

async fn start(store: &Store, me: UserId, foregrounded: bool) -> Harness {
    let (surface_tx, surface_rx) = watch::channel(foregrounded);
    let (sound, cues) = SoundPlayer::new();
    let (session, events) =
        ChatSession::start(store.clone(), &pair(), me, surface_rx, sound).await;
    Harness {
        session,
        events,
        cues,
        _surface: surface_tx,
    }
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Collect everything that arrives until the stream goes quiet.
async fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(150), rx.recv()).await {
        out.push(event);
    }
    out
}

async fn status_of(store: &Store, id: &str) -> Value {
    store
        .get(&schema::message_status(&room(), &MessageId::from(id)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_first_snapshot_is_backfill_and_later_arrivals_notify_once() {
    let store = Store::new();
    seed_profiles(&store).await;
    for i in 1..=5 {
        seed_message(&store, &format!("m{i}"), &wren(), &format!("old {i}"), "sent_to_server").await;
    }

    let mut h = start(&store, ember(), true).await;
    let initial = drain(&mut h.events).await;

    assert!(
        initial
            .iter()
            .any(|e| matches!(e, SessionEvent::Ready { room_id, .. } if room_id == &room())),
        "session never became ready"
    );
    assert_eq!(
        initial
            .iter()
            .filter(|e| matches!(e, SessionEvent::NewMessage { .. }))
            .count(),
        0,
        "backfill must not notify"
    );
    assert_eq!(h.session.call_channel(), Some("ember_wren"));

    let view = initial
        .iter()
        .rev()
        .find_map(|e| match e {
            SessionEvent::MessagesUpdated { messages } => Some(messages.clone()),
            _ => None,
        })
        .expect("no view emitted");
    assert_eq!(view.len(), 5);
    let keys: Vec<i64> = view.iter().map(|m| m.timestamp.sort_key()).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]), "view not sorted: {keys:?}");

    // The sixth message arrives live and notifies exactly once, even
    // though the status advancement writes trigger more snapshots.
    seed_message(&store, "m6", &wren(), "fresh", "sent_to_server").await;
    let after = drain(&mut h.events).await;
    let fresh: Vec<_> = after
        .iter()
        .filter_map(|e| match e {
            SessionEvent::NewMessage { message_id, .. } => Some(message_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(fresh, vec![MessageId::from("m6")]);

    let mut received = 0;
    while let Ok(Some(cue)) = timeout(Duration::from_millis(50), h.cues.recv()).await {
        if cue == SoundCue::MessageReceived {
            received += 1;
        }
    }
    assert_eq!(received, 1);
}

#[tokio::test]
async fn test_foregrounded_observer_advances_counterpart_messages_to_read() {
    let store = Store::new();
    seed_profiles(&store).await;
    seed_message(&store, "m1", &wren(), "hello", "sent_to_server").await;

    let _h = start(&store, ember(), true).await;

    for _ in 0..100 {
        if status_of(&store, "m1").await == json!("read") {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("message never reached read, got {:?}", status_of(&store, "m1").await);
}

#[tokio::test]
async fn test_backgrounded_observer_stops_at_delivered() {
    let store = Store::new();
    seed_profiles(&store).await;
    seed_message(&store, "m1", &wren(), "hello", "sent_to_server").await;

    let _h = start(&store, ember(), false).await;

    for _ in 0..100 {
        if status_of(&store, "m1").await == json!("delivered") {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&store, "m1").await, json!("delivered"));
}

#[tokio::test]
async fn test_own_messages_are_never_self_advanced() {
    let store = Store::new();
    seed_profiles(&store).await;

    let h = start(&store, ember(), true).await;
    let id = h.session.send_message("hi wren").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // The sender's own client leaves the status at the server ack.
    assert_eq!(status_of(&store, id.as_str()).await, json!("sent_to_server"));
}

#[tokio::test]
async fn test_send_plays_cue_and_lands_in_both_views() {
    let store = Store::new();
    seed_profiles(&store).await;

    let mut one = start(&store, ember(), true).await;
    let mut two = start(&store, wren(), true).await;
    drain(&mut one.events).await;
    drain(&mut two.events).await;

    let id = one.session.send_message("  hi wren  ").await.unwrap();

    wait_for(&mut two.events, |e| {
        matches!(e, SessionEvent::MessagesUpdated { messages } if messages.iter().any(|m| m.id == id))
    })
    .await;
    // Whitespace is trimmed before the store sees it.
    assert_eq!(two.session.messages()[0].text, "hi wren");

    let cue = timeout(Duration::from_millis(200), one.cues.recv()).await.unwrap();
    assert_eq!(cue, Some(SoundCue::MessageSent));

    // The recipient heard about it too, as a fresh arrival.
    let mut received = 0;
    while let Ok(Some(cue)) = timeout(Duration::from_millis(50), two.cues.recv()).await {
        if cue == SoundCue::MessageReceived {
            received += 1;
        }
    }
    assert_eq!(received, 1);
}

#[tokio::test]
async fn test_delete_for_me_hides_for_the_deleter_only() {
    let store = Store::new();
    seed_profiles(&store).await;

    let mut one = start(&store, ember(), true).await;
    let mut two = start(&store, wren(), true).await;

    let id = one.session.send_message("secret").await.unwrap();
    wait_for(&mut two.events, |e| {
        matches!(e, SessionEvent::MessagesUpdated { messages } if messages.iter().any(|m| m.id == id))
    })
    .await;

    two.session.delete_for_me(&id).await.unwrap();

    wait_for(&mut two.events, |e| {
        matches!(e, SessionEvent::MessagesUpdated { messages } if messages.is_empty())
    })
    .await;
    assert!(two.session.messages().is_empty());

    // The record itself survives, and the sender still sees it.
    let stored = store.get(&schema::message(&room(), &id)).await.unwrap();
    assert_eq!(stored["text"], json!("secret"));
    sleep(Duration::from_millis(50)).await;
    assert!(one.session.messages().iter().any(|m| m.id == id));
}

#[tokio::test]
async fn test_reaction_toggle_writes_and_prunes() {
    let store = Store::new();
    seed_profiles(&store).await;

    let one = start(&store, ember(), true).await;
    let two = start(&store, wren(), true).await;

    let id = one.session.send_message("react to me").await.unwrap();

    // Wait until the recipient's view holds the message.
    for _ in 0..100 {
        if two.session.messages().iter().any(|m| m.id == id) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    two.session.toggle_reaction(&id, "❤️").await.unwrap();
    let reactions_path = schema::message_reactions(&room(), &id);
    assert_eq!(
        store.get(&reactions_path).await.unwrap(),
        json!({ "❤️": ["wren"] })
    );

    // Wait for the reaction to flow back into the local view before the
    // second toggle reads it.
    for _ in 0..100 {
        if two.session.messages().iter().any(|m| !m.reactions.is_empty()) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    two.session.toggle_reaction(&id, "❤️").await.unwrap();
    assert_eq!(store.get(&reactions_path).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_edit_rewrites_text_and_refreshes_timestamp() {
    let store = Store::new();
    seed_profiles(&store).await;

    let one = start(&store, ember(), true).await;
    let id = one.session.send_message("teh message").await.unwrap();

    for _ in 0..100 {
        if one.session.messages().iter().any(|m| m.id == id) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let before = store.get(&schema::message(&room(), &id)).await.unwrap();
    let ts_before = before["timestamp"].as_i64().unwrap();

    one.session.edit_message(&id, "the message").await.unwrap();

    let after = store.get(&schema::message(&room(), &id)).await.unwrap();
    assert_eq!(after["text"], json!("the message"));
    assert_eq!(after["isEdited"], json!(true));
    assert!(after["timestamp"].as_i64().unwrap() > ts_before);
    // Sender identity is untouched by the partial update.
    assert_eq!(after["senderId"], json!("ember"));

    // Only own messages are editable.
    seed_message(&store, "theirs", &wren(), "not yours", "sent_to_server").await;
    for _ in 0..100 {
        if one.session.messages().iter().any(|m| m.id.as_str() == "theirs") {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let err = one
        .session
        .edit_message(&MessageId::from("theirs"), "hijack")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidParameters(_)));

    let err = one.session.edit_message(&id, "   ").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidParameters(_)));
}

#[tokio::test]
async fn test_unknown_identity_is_terminal() {
    let store = Store::new();
    seed_profiles(&store).await;

    let mut h = start(&store, UserId::from("stranger"), true).await;
    let event = wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::UnknownPartner { .. })
    })
    .await;
    assert!(
        matches!(event, SessionEvent::UnknownPartner { user_id } if user_id == UserId::from("stranger"))
    );

    let err = h.session.send_message("hello?").await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownCounterpart(_)));
    let err = h.session.toggle_reaction(&MessageId::from("m1"), "❤️").await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownCounterpart(_)));
}

#[tokio::test]
async fn test_blank_send_is_rejected_before_any_write() {
    let store = Store::new();
    seed_profiles(&store).await;

    let h = start(&store, ember(), true).await;
    let err = h.session.send_message("   ").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidParameters(_)));
    assert_eq!(
        store.get(&schema::messages(&room())).await.unwrap(),
        Value::Null
    );
}

#[tokio::test]
async fn test_partner_presence_flows_through_the_session() {
    let store = Store::new();
    seed_profiles(&store).await;

    let mut h = start(&store, ember(), true).await;
    store
        .put(
            &schema::presence(&wren()),
            json!({ "isOnline": true, "lastSeen": { ".sv": "timestamp" } }),
        )
        .await
        .unwrap();

    wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::PartnerPresence { presence } if presence.is_online)
    })
    .await;

    store
        .put(
            &schema::presence(&wren()),
            json!({ "isOnline": false, "lastSeen": { ".sv": "timestamp" } }),
        )
        .await
        .unwrap();
    let event = wait_for(&mut h.events, |e| {
        matches!(e, SessionEvent::PartnerPresence { presence } if !presence.is_online)
    })
    .await;
    if let SessionEvent::PartnerPresence { presence } = event {
        assert!(presence.last_seen.is_some());
    }
}

#[tokio::test]
async fn test_cancelled_feed_raises_a_sticky_error() {
    let store = Store::new();
    seed_profiles(&store).await;

    let mut h = start(&store, ember(), true).await;
    drain(&mut h.events).await;

    store.cancel_subscribers(&schema::messages(&room()), "permission revoked");
    let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::FeedError { .. })).await;
    assert!(
        matches!(event, SessionEvent::FeedError { detail } if detail == "permission revoked")
    );
}

#[tokio::test]
async fn test_feed_recovers_on_the_next_good_snapshot() {
    let store = Store::new();
    seed_profiles(&store).await;
    seed_message(&store, "m1", &wren(), "hello", "read").await;

    let mut h = start(&store, ember(), true).await;
    drain(&mut h.events).await;

    store.cancel_subscribers(&schema::messages(&room()), "connection lost");
    wait_for(&mut h.events, |e| matches!(e, SessionEvent::FeedError { .. })).await;

    // The reattached listener's first snapshot clears the error and
    // repopulates the view without re-notifying about old messages.
    wait_for(&mut h.events, |e| matches!(e, SessionEvent::FeedRecovered)).await;
    let after = drain(&mut h.events).await;
    assert!(
        after
            .iter()
            .all(|e| !matches!(e, SessionEvent::NewMessage { .. })),
        "reattachment must not re-notify"
    );
    assert_eq!(h.session.messages().len(), 1);
}
