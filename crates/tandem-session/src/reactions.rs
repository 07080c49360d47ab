//! Emoji-reaction reconciliation.
//!
//! A message's reactions are one mapping of emoji to the users showing
//! it. Toggling is a read-modify-write of the whole mapping against the
//! latest local snapshot; concurrent toggles from both participants are
//! last-write-wins at the store.

use std::collections::BTreeMap;

use serde_json::Value;

use tandem_types::UserId;

pub type ReactionMap = BTreeMap<String, Vec<UserId>>;

/// Compute the mapping after `user` toggles `emoji`: absent counts as
/// empty, a present user is removed, an absent user appended, and an
/// emoji whose user list empties is pruned entirely.
pub fn toggle(current: &ReactionMap, emoji: &str, user: &UserId) -> ReactionMap {
    let mut next = current.clone();
    let mut users = next.remove(emoji).unwrap_or_default();

    if let Some(pos) = users.iter().position(|u| u == user) {
        users.remove(pos);
    } else {
        users.push(user.clone());
    }

    if !users.is_empty() {
        next.insert(emoji.to_string(), users);
    }
    next
}

/// Wire form of the full mapping: JSON null when nothing remains, so
/// the store drops the node instead of keeping an empty object.
pub fn to_wire(map: &ReactionMap) -> Value {
    if map.is_empty() {
        return Value::Null;
    }
    Value::Object(
        map.iter()
            .map(|(emoji, users)| {
                let list = users
                    .iter()
                    .map(|u| Value::String(u.as_str().to_string()))
                    .collect();
                (emoji.clone(), Value::Array(list))
            })
            .collect(),
    )
}
