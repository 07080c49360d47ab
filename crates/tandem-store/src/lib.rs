//! In-process realtime store engine.
//!
//! Implements the capability contract the chat core consumes: a
//! hierarchical JSON tree with point writes (`null` deletes), partial
//! updates, full-snapshot subscriptions, store-assigned child keys,
//! server-resolved monotonic timestamps, write-on-disconnect hooks, and
//! a connectivity signal. It stands in for the hosted realtime database
//! in tests and local runs; it is not a distributed system.

pub mod path;
pub mod schema;

pub use path::StorePath;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use tandem_types::models::SERVER_TIMESTAMP_KEY;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write denied at {0}")]
    PermissionDenied(String),
    #[error("store is disconnected")]
    Disconnected,
    #[error("invalid path segment {0:?}")]
    InvalidPath(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a subscription yields: the full value under its path after every
/// intersecting write, or a terminal cancellation.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Snapshot(Value),
    Cancelled(String),
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    tree: Mutex<Value>,
    subs: Mutex<HashMap<u64, SubEntry>>,
    hooks: Mutex<HashMap<String, DisconnectHook>>,
    denied: Mutex<Vec<StorePath>>,
    clock: Mutex<i64>,
    connected_tx: watch::Sender<bool>,
    next_id: AtomicU64,
}

struct SubEntry {
    path: StorePath,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

struct DisconnectHook {
    id: u64,
    path: StorePath,
    value: Value,
}

/// Live subscription to one path. Tears itself down exactly once on
/// drop; nothing is delivered after that.
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.subs.lock().expect("subscription lock poisoned").remove(&self.id);
        }
    }
}

/// Handle to a pending compensating write. Cancelling removes the hook
/// unless a newer registration has already replaced it.
pub struct DisconnectGuard {
    id: u64,
    path: StorePath,
    store: Weak<StoreInner>,
}

impl DisconnectGuard {
    pub fn cancel(self) {
        if let Some(inner) = self.store.upgrade() {
            let mut hooks = inner.hooks.lock().expect("hook lock poisoned");
            let key = self.path.to_string();
            if hooks.get(&key).is_some_and(|h| h.id == self.id) {
                hooks.remove(&key);
                debug!("Cancelled disconnect hook at {}", self.path);
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (connected_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(StoreInner {
                tree: Mutex::new(Value::Object(Map::new())),
                subs: Mutex::new(HashMap::new()),
                hooks: Mutex::new(HashMap::new()),
                denied: Mutex::new(Vec::new()),
                clock: Mutex::new(0),
                connected_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Point read. Missing nodes read as JSON null.
    pub async fn get(&self, path: &StorePath) -> Result<Value, StoreError> {
        if let Some(seg) = path.invalid_segment() {
            return Err(StoreError::InvalidPath(seg.to_string()));
        }
        let tree = self.inner.tree.lock().expect("tree lock poisoned");
        Ok(value_at(&tree, path).cloned().unwrap_or(Value::Null))
    }

    /// Point write. JSON null deletes the node. Server-timestamp
    /// sentinels in the value resolve against the store clock at commit.
    pub async fn put(&self, path: &StorePath, mut value: Value) -> Result<(), StoreError> {
        self.inner.check_write(path)?;
        resolve_server_values(&mut value, self.inner.next_clock());
        self.inner.apply(path, value);
        Ok(())
    }

    /// Partial-field update: each entry is written under `path` without
    /// touching sibling fields. Null entries delete their field.
    pub async fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.inner.check_write(path)?;
        for key in fields.keys() {
            if let Some(seg) = path.child(key.clone()).invalid_segment() {
                return Err(StoreError::InvalidPath(seg.to_string()));
            }
        }
        let ts = self.inner.next_clock();
        for (key, mut value) in fields {
            resolve_server_values(&mut value, ts);
            self.inner.apply(&path.child(key), value);
        }
        Ok(())
    }

    /// Store-assigned child key for list pushes.
    pub fn push_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Subscribe to a path. The current value arrives immediately as the
    /// first snapshot, then one snapshot per intersecting write.
    pub fn subscribe(&self, path: &StorePath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let tree = self.inner.tree.lock().expect("tree lock poisoned");
            let snapshot = value_at(&tree, path).cloned().unwrap_or(Value::Null);
            let _ = tx.send(StoreEvent::Snapshot(snapshot));
        }
        self.inner
            .subs
            .lock()
            .expect("subscription lock poisoned")
            .insert(id, SubEntry { path: path.clone(), tx });

        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Register a compensating write that fires when connectivity is
    /// lost without explicit app action. At most one hook per path;
    /// re-registration replaces the previous one.
    pub fn on_disconnect_put(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<DisconnectGuard, StoreError> {
        if let Some(seg) = path.invalid_segment() {
            return Err(StoreError::InvalidPath(seg.to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.hooks.lock().expect("hook lock poisoned").insert(
            path.to_string(),
            DisconnectHook {
                id,
                path: path.clone(),
                value,
            },
        );
        Ok(DisconnectGuard {
            id,
            path: path.clone(),
            store: Arc::downgrade(&self.inner),
        })
    }

    /// Connectivity signal. `true` while the store link is up.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Drive the link state. Dropping the link fires every pending
    /// disconnect hook, timestamped at fire time.
    pub fn set_connected(&self, connected: bool) {
        let was = *self.inner.connected_tx.borrow();
        if was == connected {
            return;
        }
        self.inner.connected_tx.send_replace(connected);

        if !connected {
            let fired: Vec<DisconnectHook> = {
                let mut hooks = self.inner.hooks.lock().expect("hook lock poisoned");
                hooks.drain().map(|(_, hook)| hook).collect()
            };
            for mut hook in fired {
                debug!("Disconnect hook firing at {}", hook.path);
                resolve_server_values(&mut hook.value, self.inner.next_clock());
                self.inner.apply(&hook.path, hook.value);
            }
        }
    }

    /// Fault injection: deny writes under a prefix (stands in for the
    /// hosted store's security rules).
    pub fn deny_writes(&self, prefix: &StorePath) {
        self.inner
            .denied
            .lock()
            .expect("deny lock poisoned")
            .push(prefix.clone());
    }

    pub fn allow_writes(&self, prefix: &StorePath) {
        self.inner
            .denied
            .lock()
            .expect("deny lock poisoned")
            .retain(|p| p != prefix);
    }

    /// Fault injection: terminally cancel every subscription touching
    /// `path`, as the hosted store does on permission or connectivity
    /// loss.
    pub fn cancel_subscribers(&self, path: &StorePath, reason: &str) {
        let mut subs = self.inner.subs.lock().expect("subscription lock poisoned");
        subs.retain(|_, sub| {
            if sub.path.is_related(path) {
                let _ = sub.tx.send(StoreEvent::Cancelled(reason.to_string()));
                false
            } else {
                true
            }
        });
    }
}

impl StoreInner {
    fn check_write(&self, path: &StorePath) -> Result<(), StoreError> {
        if let Some(seg) = path.invalid_segment() {
            return Err(StoreError::InvalidPath(seg.to_string()));
        }
        if !*self.connected_tx.borrow() {
            return Err(StoreError::Disconnected);
        }
        let denied = self.denied.lock().expect("deny lock poisoned");
        if denied.iter().any(|p| p.is_prefix_of(path)) {
            return Err(StoreError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    /// Strictly monotonic store clock, in milliseconds.
    fn next_clock(&self) -> i64 {
        let mut last = self.clock.lock().expect("clock lock poisoned");
        let now = chrono::Utc::now().timestamp_millis();
        *last = now.max(*last + 1);
        *last
    }

    fn apply(&self, path: &StorePath, value: Value) {
        let tree = {
            let mut tree = self.tree.lock().expect("tree lock poisoned");
            set_at(&mut tree, path, value);
            tree
        };

        // Fan out full snapshots to every subscription whose path
        // intersects the write; dead receivers drop out here.
        let mut subs = self.subs.lock().expect("subscription lock poisoned");
        subs.retain(|_, sub| {
            if sub.path.is_related(path) {
                let snapshot = value_at(&tree, &sub.path).cloned().unwrap_or(Value::Null);
                sub.tx.send(StoreEvent::Snapshot(snapshot)).is_ok()
            } else {
                true
            }
        });
    }
}

fn value_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn as_object_coerce(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just coerced to an object"),
    }
}

fn set_at(root: &mut Value, path: &StorePath, value: Value) {
    if path.is_root() {
        *root = if value.is_null() { Value::Object(Map::new()) } else { value };
        return;
    }

    let (last, parents) = path
        .segments()
        .split_last()
        .expect("non-root path has a last segment");

    let mut current = root;
    for segment in parents {
        current = as_object_coerce(current)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = as_object_coerce(current);
    if value.is_null() {
        map.remove(last);
    } else {
        map.insert(last.clone(), value);
    }
}

/// Replace `{".sv": "timestamp"}` sentinels with the commit timestamp,
/// recursively. One write resolves all of its sentinels to one instant.
fn resolve_server_values(value: &mut Value, ts: i64) {
    match value {
        Value::Object(map) => {
            if map.len() == 1
                && map.get(SERVER_TIMESTAMP_KEY).and_then(Value::as_str) == Some("timestamp")
            {
                *value = Value::from(ts);
            } else {
                for (_, v) in map.iter_mut() {
                    resolve_server_values(v, ts);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                resolve_server_values(v, ts);
            }
        }
        _ => {}
    }
}
