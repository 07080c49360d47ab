//! Local-notification shell over the external push channel.
//!
//! Delivery is owned by the push service; this side formats incoming
//! payloads for the local notification surface and keeps the user's
//! registration token current in the store.

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, warn};

use tandem_store::{Store, schema};
use tandem_types::UserId;

use crate::error::SessionError;

/// Fixed channel the surface registers once; high importance so new
/// messages surface heads-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub high_importance: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: "TandemMessages".to_string(),
            name: "Tandem Chat Messages".to_string(),
            description: "Notifications for new chat messages".to_string(),
            high_importance: true,
        }
    }
}

/// Push payload as the external service hands it over. All fields are
/// optional; formatting fills the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub sender_name: Option<String>,
}

/// A notification ready for the local surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
}

/// Formats push payloads into local notifications on a channel sink.
pub struct Notifier {
    channel: ChannelConfig,
    tx: mpsc::UnboundedSender<LocalNotification>,
}

impl Notifier {
    pub fn new(channel: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<LocalNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { channel, tx }, rx)
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// "sender: body" when both are known, with generic fallbacks for
    /// payloads missing either field.
    pub fn handle_push(&self, payload: PushPayload) {
        let title = payload.title.unwrap_or_else(|| "New Message".to_string());
        let body = match (payload.body, payload.sender_name) {
            (Some(body), Some(sender)) => format!("{sender}: {body}"),
            (Some(body), None) => body,
            (None, _) => {
                warn!("Push payload missing body; using generic text");
                "You have a new message.".to_string()
            }
        };
        let _ = self.tx.send(LocalNotification { title, body });
    }
}

/// Persist a refreshed push registration token. Without a signed-in
/// user the token is dropped; the next login re-registers it anyway.
pub async fn register_push_token(
    store: &Store,
    user: Option<&UserId>,
    token: &str,
) -> Result<(), SessionError> {
    let Some(user) = user else {
        warn!("No signed-in user; push token not persisted");
        return Ok(());
    };
    if token.trim().is_empty() {
        return Err(SessionError::InvalidParameters("blank push token".to_string()));
    }

    store
        .put(&schema::push_token(user), json!(token))
        .await
        .map_err(|e| {
            error!("Failed to persist push token for {user}: {e}");
            SessionError::StoreWrite(e)
        })
}
