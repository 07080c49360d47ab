use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::ids::{MessageId, UserId};

/// Sentinel key the store recognises in written values and replaces with
/// its own clock at commit time.
pub const SERVER_TIMESTAMP_KEY: &str = ".sv";

/// Server-assigned millisecond timestamp. Outgoing values carry the
/// pending sentinel; the store resolves it on commit. A value observed
/// before resolution sorts as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Resolved(i64),
    Pending,
}

impl Timestamp {
    pub fn resolved(&self) -> Option<i64> {
        match self {
            Timestamp::Resolved(ms) => Some(*ms),
            Timestamp::Pending => None,
        }
    }

    pub fn sort_key(&self) -> i64 {
        self.resolved().unwrap_or(0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::Pending
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Resolved(ms) => serializer.serialize_i64(*ms),
            Timestamp::Pending => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(SERVER_TIMESTAMP_KEY, "timestamp")?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Timestamp::Resolved)
                .ok_or_else(|| D::Error::custom("timestamp out of i64 range")),
            Value::Object(ref map)
                if map.get(SERVER_TIMESTAMP_KEY).and_then(Value::as_str) == Some("timestamp") =>
            {
                Ok(Timestamp::Pending)
            }
            Value::Null => Ok(Timestamp::Pending),
            other => Err(D::Error::custom(format!("unexpected timestamp value: {other}"))),
        }
    }
}

/// Per-observation delivery state of a message. The order is total and
/// advancement is forward-only for a given observing client; the store
/// keeps a single field, not a per-reader receipt list.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Sending,
    SentToServer,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Wire spelling, as stored in the status field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::SentToServer => "sent_to_server",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

/// One chat message as stored under `chats/{room}/messages/{id}`.
///
/// The id is the store child key and lives outside the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub timestamp: Timestamp,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub is_edited: bool,
    /// Viewers this message is hidden from. Hiding is per-viewer and
    /// never removes the record for the counterpart.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deleted_for: BTreeMap<UserId, bool>,
    /// Emoji -> reacting users. No key ever maps to an empty list.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

impl Message {
    /// A freshly composed outgoing message, timestamp left to the store.
    pub fn outgoing(text: impl Into<String>, sender_id: UserId) -> Self {
        Self {
            id: MessageId::default(),
            text: text.into(),
            sender_id,
            timestamp: Timestamp::Pending,
            status: MessageStatus::Sending,
            is_edited: false,
            deleted_for: BTreeMap::new(),
            reactions: BTreeMap::new(),
        }
    }

    /// Decode a stored child value, attaching its store key. Malformed
    /// children are logged and skipped rather than failing the snapshot.
    pub fn decode(id: MessageId, value: &Value) -> Option<Self> {
        match serde_json::from_value::<Message>(value.clone()) {
            Ok(mut msg) => {
                msg.id = id;
                Some(msg)
            }
            Err(err) => {
                warn!("Skipping malformed message {id}: {err}");
                None
            }
        }
    }

    pub fn hidden_for(&self, viewer: &UserId) -> bool {
        self.deleted_for.get(viewer).copied().unwrap_or(false)
    }

    /// The emoji this user currently reacts with, if any.
    pub fn reacted_with(&self, user: &UserId) -> Option<&str> {
        self.reactions
            .iter()
            .find(|(_, users)| users.contains(user))
            .map(|(emoji, _)| emoji.as_str())
    }
}

/// Presence record stored under `status/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Timestamp>,
}

impl Presence {
    /// Record written at connection-establishment.
    pub fn online() -> Self {
        Self {
            is_online: true,
            last_seen: Some(Timestamp::Pending),
        }
    }

    /// Record written on sign-out and by the compensating disconnect hook.
    pub fn offline() -> Self {
        Self {
            is_online: false,
            last_seen: Some(Timestamp::Pending),
        }
    }

    /// Human label for the header line: "Online", "just now",
    /// "5 mins ago", "3 hrs ago", "yesterday at 04:12 PM", or a date.
    pub fn last_seen_label(&self, now_ms: i64) -> String {
        if self.is_online {
            return "Online".to_string();
        }
        let Some(ts) = self.last_seen.as_ref().and_then(Timestamp::resolved) else {
            return "Offline".to_string();
        };

        let diff = now_ms.saturating_sub(ts);
        let minutes = diff / 60_000;
        let hours = minutes / 60;
        let days = hours / 24;

        let local = chrono::DateTime::from_timestamp_millis(ts);
        match (days, hours, minutes) {
            (d, _, _) if d > 1 => local
                .map(|t| t.format("%b %-d, %I:%M %p").to_string())
                .unwrap_or_else(|| "a while ago".to_string()),
            (1, _, _) => local
                .map(|t| format!("yesterday at {}", t.format("%I:%M %p")))
                .unwrap_or_else(|| "a while ago".to_string()),
            (_, h, _) if h > 0 => format!("{} hr{} ago", h, if h > 1 { "s" } else { "" }),
            (_, _, m) if m > 0 => format!("{} min{} ago", m, if m > 1 { "s" } else { "" }),
            _ => "just now".to_string(),
        }
    }
}
