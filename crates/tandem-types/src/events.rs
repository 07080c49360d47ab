use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};
use crate::models::{Message, Presence};

/// Events a chat session emits to its owning surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// Partner identity resolved; room subscriptions are open.
    Ready {
        partner_id: UserId,
        partner_name: String,
        room_id: RoomId,
    },

    /// The local identity has no configured counterpart. Terminal.
    UnknownPartner { user_id: UserId },

    /// Rebuilt ordered view of the conversation, already filtered for
    /// this viewer.
    MessagesUpdated { messages: Vec<Message> },

    /// A counterpart message was seen for the first time after backfill.
    /// Fires at most once per message per subscription lifetime.
    NewMessage {
        message_id: MessageId,
        sender_id: UserId,
        text: String,
    },

    /// Counterpart presence changed.
    PartnerPresence { presence: Presence },

    /// The message subscription was cancelled by the store. Sticky until
    /// the next successful read.
    FeedError { detail: String },

    /// A successful read arrived after a feed error.
    FeedRecovered,
}
