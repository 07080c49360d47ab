//! Two-party chat session controller.
//!
//! Composes partner resolution, room derivation, the message feed, and
//! the counterpart presence stream behind one event channel, and hosts
//! the outbound operations. Operations are only valid in `Ready`; the
//! counterpart mapping is fixed at two accounts.

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tandem_store::{Store, StoreError, StoreEvent, schema};
use tandem_types::{
    Message, MessageId, MessageStatus, Presence, RoomId, SessionEvent, Timestamp, UserId,
};

use crate::config::PairConfig;
use crate::error::SessionError;
use crate::feed::MessageFeed;
use crate::reactions;
use crate::sound::{SoundCue, SoundPlayer};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    PartnerResolving,
    Ready {
        partner: UserId,
        partner_name: String,
        room: RoomId,
    },
    /// The local identity maps to no configured partner. Terminal: no
    /// chat is possible for this session.
    UnknownPartner,
}

pub struct ChatSession {
    store: Store,
    me: UserId,
    state: SessionState,
    events: mpsc::UnboundedSender<SessionEvent>,
    view: Arc<RwLock<Vec<Message>>>,
    sound: SoundPlayer,
    feed_task: Option<JoinHandle<()>>,
    presence_task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Resolve the counterpart and open the room. Returns the session
    /// and the event stream its surface renders.
    pub async fn start(
        store: Store,
        pair: &PairConfig,
        me: UserId,
        surface_active: watch::Receiver<bool>,
        sound: SoundPlayer,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            store,
            me,
            state: SessionState::Uninitialized,
            events: events_tx,
            view: Arc::new(RwLock::new(Vec::new())),
            sound,
            feed_task: None,
            presence_task: None,
        };
        session.resolve_and_open(pair, surface_active).await;
        (session, events_rx)
    }

    async fn resolve_and_open(&mut self, pair: &PairConfig, surface_active: watch::Receiver<bool>) {
        self.state = SessionState::PartnerResolving;

        let Some(partner) = pair.counterpart(&self.me) else {
            error!("No counterpart configured for {}", self.me);
            self.state = SessionState::UnknownPartner;
            let _ = self.events.send(SessionEvent::UnknownPartner {
                user_id: self.me.clone(),
            });
            return;
        };

        let partner_name = self.resolve_display_name(&partner).await;
        let room = RoomId::for_pair(&self.me, &partner);
        info!("{} chatting with {partner_name} in {room}", self.me);

        let feed = MessageFeed::new(
            self.store.clone(),
            room.clone(),
            self.me.clone(),
            surface_active,
            self.events.clone(),
            self.sound.clone(),
            self.view.clone(),
        );
        self.feed_task = Some(tokio::spawn(feed.run()));

        self.presence_task = Some(tokio::spawn(watch_presence(
            self.store.clone(),
            partner.clone(),
            self.events.clone(),
        )));

        let _ = self.events.send(SessionEvent::Ready {
            partner_id: partner.clone(),
            partner_name: partner_name.clone(),
            room_id: room.clone(),
        });
        self.state = SessionState::Ready {
            partner,
            partner_name,
            room,
        };
    }

    /// Partner name lookup is best-effort; the chat opens either way.
    async fn resolve_display_name(&self, partner: &UserId) -> String {
        match self.store.get(&schema::display_name(partner)).await {
            Ok(Value::String(name)) if !name.trim().is_empty() => name,
            Ok(_) => {
                warn!("No display name stored for {partner}");
                "Partner".to_string()
            }
            Err(e) => {
                error!("Failed to load display name for {partner}: {e}");
                "Partner".to_string()
            }
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Latest rebuilt view, already filtered for this viewer.
    pub fn messages(&self) -> Vec<Message> {
        self.view.read().expect("view lock poisoned").clone()
    }

    /// Channel name for a voice call with the partner — the same
    /// derived name as the chat room, handed to the transport as-is.
    pub fn call_channel(&self) -> Option<&str> {
        match &self.state {
            SessionState::Ready { room, .. } => Some(room.channel_name()),
            _ => None,
        }
    }

    fn ready_room(&self) -> Result<&RoomId, SessionError> {
        match &self.state {
            SessionState::Ready { room, .. } => Ok(room),
            SessionState::UnknownPartner => {
                Err(SessionError::UnknownCounterpart(self.me.clone()))
            }
            _ => Err(SessionError::InvalidParameters("no active chat room".to_string())),
        }
    }

    fn find_message(&self, id: &MessageId) -> Option<Message> {
        self.view
            .read()
            .expect("view lock poisoned")
            .iter()
            .find(|m| &m.id == id)
            .cloned()
    }

    /// Create the message, then advance it to sent-to-server on the
    /// ack. A failed ack leaves it in "sending"; logged, not retried.
    pub async fn send_message(&self, text: &str) -> Result<MessageId, SessionError> {
        let room = self.ready_room()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidParameters("empty message".to_string()));
        }

        let id = MessageId::new(self.store.push_id());
        let value =
            serde_json::to_value(Message::outgoing(text, self.me.clone())).map_err(StoreError::from)?;

        self.store
            .put(&schema::message(room, &id), value)
            .await
            .map_err(|e| {
                error!("Failed to send message {id}: {e}");
                SessionError::StoreWrite(e)
            })?;

        let status_path = schema::message_status(room, &id);
        match self
            .store
            .put(&status_path, json!(MessageStatus::SentToServer.as_str()))
            .await
        {
            Ok(()) => self.sound.play(SoundCue::MessageSent),
            Err(e) => warn!("Failed to advance {id} to sent_to_server: {e}"),
        }
        Ok(id)
    }

    /// Rewrite one of this user's own messages in place; marks it
    /// edited and refreshes the server timestamp.
    pub async fn edit_message(&self, id: &MessageId, new_text: &str) -> Result<(), SessionError> {
        let room = self.ready_room()?;
        let text = new_text.trim();
        if text.is_empty() || id.is_blank() {
            return Err(SessionError::InvalidParameters("empty edit".to_string()));
        }
        match self.find_message(id) {
            Some(msg) if msg.sender_id == self.me => {}
            Some(_) => {
                return Err(SessionError::InvalidParameters(format!(
                    "message {id} was not sent by {}",
                    self.me
                )));
            }
            None => {
                return Err(SessionError::InvalidParameters(format!("unknown message {id}")));
            }
        }

        let mut fields = Map::new();
        fields.insert("text".to_string(), json!(text));
        fields.insert("isEdited".to_string(), json!(true));
        fields.insert(
            "timestamp".to_string(),
            serde_json::to_value(Timestamp::Pending).map_err(StoreError::from)?,
        );

        self.store
            .update(&schema::message(room, id), fields)
            .await
            .map_err(|e| {
                error!("Failed to edit message {id}: {e}");
                SessionError::StoreWrite(e)
            })
    }

    /// "Delete for me": hides the message for this viewer only; the
    /// counterpart keeps seeing it.
    pub async fn delete_for_me(&self, id: &MessageId) -> Result<(), SessionError> {
        let room = self.ready_room()?;
        if id.is_blank() || self.me.is_blank() {
            return Err(SessionError::InvalidParameters("invalid delete request".to_string()));
        }
        if self.find_message(id).is_none() {
            return Err(SessionError::InvalidParameters(format!("unknown message {id}")));
        }

        self.store
            .put(&schema::message_deleted_for(room, id, &self.me), json!(true))
            .await
            .map_err(|e| {
                error!("Failed to delete message {id} for {}: {e}", self.me);
                SessionError::StoreWrite(e)
            })?;
        info!("Message {id} hidden for {}", self.me);
        Ok(())
    }

    /// Toggle this user's emoji on a message. Read-modify-write of the
    /// full mapping against the latest local snapshot; concurrent
    /// toggles from both parties are last-write-wins at the store.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), SessionError> {
        let room = self.ready_room()?;
        if emoji.trim().is_empty() || id.is_blank() {
            return Err(SessionError::InvalidParameters("empty reaction".to_string()));
        }
        let current = self
            .find_message(id)
            .ok_or_else(|| SessionError::InvalidParameters(format!("unknown message {id}")))?
            .reactions;

        let next = reactions::toggle(&current, emoji, &self.me);
        self.store
            .put(&schema::message_reactions(room, id), reactions::to_wire(&next))
            .await
            .map_err(|e| {
                error!("Failed to update reaction on {id}: {e}");
                SessionError::StoreWrite(e)
            })
    }

    /// Tear the subscriptions down. Presence teardown belongs to the
    /// tracker, which the shell signs out separately.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        if let Some(task) = self.presence_task.take() {
            task.abort();
        }
        self.state = SessionState::Uninitialized;
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counterpart presence stream. A cancelled or malformed read reports
/// offline rather than nothing, so the header never shows stale state.
async fn watch_presence(
    store: Store,
    partner: UserId,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut sub = store.subscribe(&schema::presence(&partner));
    while let Some(event) = sub.recv().await {
        match event {
            StoreEvent::Snapshot(Value::Null) => {
                let _ = events.send(SessionEvent::PartnerPresence {
                    presence: Presence::default(),
                });
            }
            StoreEvent::Snapshot(value) => {
                let presence = serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!("Malformed presence record for {partner}: {e}");
                    Presence::default()
                });
                if events
                    .send(SessionEvent::PartnerPresence { presence })
                    .is_err()
                {
                    break;
                }
            }
            StoreEvent::Cancelled(reason) => {
                warn!("Presence subscription for {partner} cancelled: {reason}");
                let _ = events.send(SessionEvent::PartnerPresence {
                    presence: Presence::default(),
                });
                break;
            }
        }
    }
}
