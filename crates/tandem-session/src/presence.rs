//! Mirrors link state into the shared presence record for one user.
//!
//! On every transition to connected the tracker writes the online
//! record and (re)registers the compensating offline write, so an
//! ungraceful disconnect still leaves an accurate last-seen behind.
//! Explicit sign-out writes offline itself and cancels the hook.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tandem_store::{DisconnectGuard, Store, schema};
use tandem_types::{Presence, UserId};

pub struct PresenceTracker {
    store: Store,
    user: UserId,
    watcher: Option<JoinHandle<()>>,
    guard: Arc<Mutex<Option<DisconnectGuard>>>,
}

impl PresenceTracker {
    pub fn new(store: Store, user: UserId) -> Self {
        Self {
            store,
            user,
            watcher: None,
            guard: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin mirroring. Safe to call repeatedly; an active watcher is
    /// kept rather than duplicated.
    pub fn start(&mut self) {
        if self.watcher.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Presence watcher already active for {}", self.user);
            return;
        }

        let store = self.store.clone();
        let user = self.user.clone();
        let guard_slot = self.guard.clone();

        self.watcher = Some(tokio::spawn(async move {
            let mut connectivity = store.connectivity();
            loop {
                let connected = *connectivity.borrow_and_update();
                if connected {
                    go_online(&store, &user, &guard_slot).await;
                } else {
                    // The registered hook owns the offline write here.
                    debug!("Link down for {user}");
                }
                if connectivity.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Explicit sign-out: offline write first, then cancel the pending
    /// compensating write, then stop watching the link.
    pub async fn sign_out(&mut self) {
        match self.store.put(&schema::presence(&self.user), record(false)).await {
            Ok(()) => info!("{} set offline", self.user),
            Err(e) => error!("Failed to set {} offline: {e}", self.user),
        }

        if let Some(guard) = self.guard.lock().expect("guard lock poisoned").take() {
            guard.cancel();
        }
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }
}

fn record(online: bool) -> Value {
    let presence = if online { Presence::online() } else { Presence::offline() };
    serde_json::to_value(presence).expect("presence record serializes")
}

async fn go_online(store: &Store, user: &UserId, guard_slot: &Arc<Mutex<Option<DisconnectGuard>>>) {
    let path = schema::presence(user);

    match store.put(&path, record(true)).await {
        Ok(()) => info!("{user} set online"),
        Err(e) => error!("Failed to set {user} online: {e}"),
    }

    // Replaces any previous hook for this path, so at most one
    // compensating write is ever pending per user.
    match store.on_disconnect_put(&path, record(false)) {
        Ok(new_guard) => {
            *guard_slot.lock().expect("guard lock poisoned") = Some(new_guard);
        }
        Err(e) => error!("Failed to register disconnect hook for {user}: {e}"),
    }
}
