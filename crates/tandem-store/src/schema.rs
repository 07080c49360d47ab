//! Named record types and path builders for everything the store holds.
//!
//! The tree has no schema of its own, so every path the application
//! touches is declared here once, next to the record type that lives at
//! it, and the layout carries an explicit version stamped into the
//! store itself.
//!
//! Layout, version 1:
//!
//!   meta/schemaVersion                               u32
//!   chats/{roomId}/messages/{messageId}              Message value
//!   chats/{roomId}/messages/{messageId}/status       MessageStatus
//!   chats/{roomId}/messages/{messageId}/reactions    emoji -> [userId]
//!   chats/{roomId}/messages/{messageId}/deletedFor/{userId}  true
//!   status/{userId}                                  Presence value
//!   users/{userId}/displayName                       string
//!   users/{userId}/pushToken                         string

use anyhow::{Context, bail};
use serde_json::json;
use tracing::info;

use tandem_types::{MessageId, RoomId, UserId};

use crate::{Store, StorePath};

/// Version of the tree layout described by this module.
pub const SCHEMA_VERSION: u32 = 1;

pub fn schema_version() -> StorePath {
    StorePath::parse("meta/schemaVersion")
}

pub fn messages(room: &RoomId) -> StorePath {
    StorePath::root()
        .child("chats")
        .child(room.as_str())
        .child("messages")
}

pub fn message(room: &RoomId, id: &MessageId) -> StorePath {
    messages(room).child(id.as_str())
}

pub fn message_status(room: &RoomId, id: &MessageId) -> StorePath {
    message(room, id).child("status")
}

pub fn message_reactions(room: &RoomId, id: &MessageId) -> StorePath {
    message(room, id).child("reactions")
}

pub fn message_deleted_for(room: &RoomId, id: &MessageId, viewer: &UserId) -> StorePath {
    message(room, id).child("deletedFor").child(viewer.as_str())
}

pub fn presence(user: &UserId) -> StorePath {
    StorePath::root().child("status").child(user.as_str())
}

pub fn display_name(user: &UserId) -> StorePath {
    StorePath::root()
        .child("users")
        .child(user.as_str())
        .child("displayName")
}

pub fn push_token(user: &UserId) -> StorePath {
    StorePath::root()
        .child("users")
        .child(user.as_str())
        .child("pushToken")
}

/// Stamp a fresh store with the current schema version, or verify a
/// previously stamped one. A mismatch is fatal: nothing in this layout
/// migrates in place.
pub async fn ensure_version(store: &Store) -> anyhow::Result<()> {
    let current = store
        .get(&schema_version())
        .await
        .context("reading schema version")?;

    match current.as_u64() {
        None => {
            store
                .put(&schema_version(), json!(SCHEMA_VERSION))
                .await
                .context("stamping schema version")?;
            info!("Store stamped with schema version {SCHEMA_VERSION}");
            Ok(())
        }
        Some(v) if v == u64::from(SCHEMA_VERSION) => Ok(()),
        Some(v) => bail!("store has schema version {v}, this build expects {SCHEMA_VERSION}"),
    }
}
