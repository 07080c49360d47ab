//! Message store adapter for one room.
//!
//! Every store snapshot is rebuilt into the ordered conversation view;
//! counterpart messages drive per-observation status advancement, and
//! messages first seen after backfill trigger the one-shot new-message
//! effects.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use tandem_store::{Store, StoreEvent, schema};
use tandem_types::{Message, MessageId, MessageStatus, RoomId, SessionEvent, UserId};

use crate::error::SessionError;
use crate::sound::{SoundCue, SoundPlayer};

pub(crate) struct MessageFeed {
    store: Store,
    room: RoomId,
    viewer: UserId,
    surface_active: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    sound: SoundPlayer,
    view: Arc<RwLock<Vec<Message>>>,
    seen: HashSet<MessageId>,
    backfilled: bool,
    feed_error: bool,
}

impl MessageFeed {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Store,
        room: RoomId,
        viewer: UserId,
        surface_active: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<SessionEvent>,
        sound: SoundPlayer,
        view: Arc<RwLock<Vec<Message>>>,
    ) -> Self {
        Self {
            store,
            room,
            viewer,
            surface_active,
            events,
            sound,
            view,
            seen: HashSet::new(),
            backfilled: false,
            feed_error: false,
        }
    }

    /// Drive the subscription. A cancelled read raises the sticky feed
    /// error and the listener is reattached; the next good snapshot
    /// clears it. The worker drains queued advancement writes after the
    /// feed itself is gone.
    pub(crate) async fn run(mut self) {
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();
        tokio::spawn(advance_worker(
            self.store.clone(),
            self.room.clone(),
            advance_rx,
        ));

        loop {
            let mut sub = self.store.subscribe(&schema::messages(&self.room));
            debug!("Message feed attached to {}", self.room);

            let mut cancelled = false;
            while let Some(event) = sub.recv().await {
                match event {
                    StoreEvent::Snapshot(snapshot) => self.on_snapshot(snapshot, &advance_tx),
                    StoreEvent::Cancelled(reason) => {
                        let err = SessionError::ReadCancelled(reason.clone());
                        warn!("Message feed for {}: {err}", self.room);
                        self.feed_error = true;
                        let _ = self.events.send(SessionEvent::FeedError { detail: reason });
                        cancelled = true;
                        break;
                    }
                }
            }
            if !cancelled {
                break;
            }
        }
        debug!("Message feed detached from {}", self.room);
    }

    fn on_snapshot(
        &mut self,
        snapshot: Value,
        advance_tx: &mpsc::UnboundedSender<(MessageId, MessageStatus)>,
    ) {
        if self.feed_error {
            self.feed_error = false;
            let _ = self.events.send(SessionEvent::FeedRecovered);
        }

        let mut messages: Vec<Message> = snapshot
            .as_object()
            .map(|children| {
                children
                    .iter()
                    .filter_map(|(key, value)| Message::decode(MessageId::new(key.clone()), value))
                    .collect()
            })
            .unwrap_or_default();

        // Stable ascending sort; unresolved timestamps sort as 0.
        messages.sort_by_key(|m| m.timestamp.sort_key());

        let surface_active = *self.surface_active.borrow();
        let mut fresh = Vec::new();

        for msg in &messages {
            if msg.sender_id == self.viewer {
                continue;
            }
            // Fire-and-forget advancement, queued off the snapshot path.
            // The queue is FIFO, so a message going delivered and read in
            // the same or successive batches only ever moves forward.
            if msg.status == MessageStatus::SentToServer {
                let _ = advance_tx.send((msg.id.clone(), MessageStatus::Delivered));
            }
            if surface_active
                && matches!(msg.status, MessageStatus::SentToServer | MessageStatus::Delivered)
            {
                let _ = advance_tx.send((msg.id.clone(), MessageStatus::Read));
            }
            if self.backfilled && !self.seen.contains(&msg.id) {
                fresh.push(msg.clone());
            }
        }

        for msg in &messages {
            self.seen.insert(msg.id.clone());
        }
        // Whatever the first snapshot held — even nothing — it is
        // historical backfill, not news.
        self.backfilled = true;

        for msg in fresh {
            debug!("New message {} from {}", msg.id, msg.sender_id);
            self.sound.play(SoundCue::MessageReceived);
            let _ = self.events.send(SessionEvent::NewMessage {
                message_id: msg.id,
                sender_id: msg.sender_id,
                text: msg.text,
            });
        }

        // Per-viewer hiding applies to the emitted view only; the
        // records themselves stay for the counterpart.
        let view: Vec<Message> = messages
            .into_iter()
            .filter(|m| !m.hidden_for(&self.viewer))
            .collect();
        *self.view.write().expect("view lock poisoned") = view.clone();
        let _ = self.events.send(SessionEvent::MessagesUpdated { messages: view });
    }
}

/// Writes queued status advancements in order, off the snapshot path.
/// Failures are logged, never retried. Exits once the feed drops its
/// sender, after draining whatever is still queued.
async fn advance_worker(
    store: Store,
    room: RoomId,
    mut rx: mpsc::UnboundedReceiver<(MessageId, MessageStatus)>,
) {
    while let Some((id, status)) = rx.recv().await {
        let path = schema::message_status(&room, &id);
        if let Err(e) = store.put(&path, json!(status.as_str())).await {
            warn!("Failed to mark {id} {}: {e}", status.as_str());
        }
    }
}
