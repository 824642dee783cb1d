// Remote store seam
// Raw change-notification deliveries as handed over by the (opaque) remote
// document store, plus an in-memory collection used by tests and
// single-process embeddings.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One live item in a collection snapshot: stable identity plus an opaque
/// payload. Decoding into a typed document happens in the reconciler.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id: String,
    pub payload: Value,
}

impl RawItem {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        RawItem { id: id.into(), payload }
    }
}

/// One delivery from a collection's change-notification stream: the full set
/// of currently-live items plus the transport's local-write marker.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    pub items: Vec<RawItem>,
    /// True when the triggering write happened on this process (optimistic
    /// local echo), false for remote-origin changes.
    pub local_origin: bool,
}

/// In-process stand-in for one remote collection.
///
/// Exposes the store's write API (`add`/`set`/`delete`) and pushes a full
/// snapshot to every subscriber on each write, exactly the way the real
/// transport delivers change notifications. `deliver_remote` simulates a
/// write made by another participant.
pub struct MemoryCollection {
    name: String,
    inner: Mutex<Inner>,
}

struct Inner {
    // BTreeMap keeps snapshot order deterministic for tests
    items: BTreeMap<String, Value>,
    next_id: u64,
    subscribers: Vec<mpsc::Sender<RawSnapshot>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryCollection {
            name: name.into(),
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe a delivery queue. The current snapshot is pushed
    /// immediately so a fresh listener gets its first-sync delivery without
    /// waiting for the next write.
    pub fn subscribe(&self, tx: mpsc::Sender<RawSnapshot>) {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = Self::snapshot_of(&inner.items, false);
        let _ = tx.try_send(snapshot);
        inner.subscribers.push(tx);
    }

    /// Write API: add a new item, returns its generated id. A value that
    /// fails to serialize is dropped (logged, nothing stored or notified)
    /// rather than persisted as a null payload that every later snapshot
    /// would surface as a decode error.
    pub fn add<T: Serialize>(&self, value: &T) -> String {
        let mut inner = self.inner.lock().unwrap();
        let id = format!("{}-{}", self.name, inner.next_id);
        inner.next_id += 1;
        match serde_json::to_value(value) {
            Ok(payload) => {
                inner.items.insert(id.clone(), payload);
                Self::notify(&mut inner, true);
            }
            Err(err) => warn!(%id, %err, "local write dropped, payload failed to serialize"),
        }
        id
    }

    /// Write API: overwrite an item in place. Unserializable values are
    /// dropped the same way as in `add`.
    pub fn set<T: Serialize>(&self, id: &str, value: &T) {
        let mut inner = self.inner.lock().unwrap();
        match serde_json::to_value(value) {
            Ok(payload) => {
                inner.items.insert(id.to_string(), payload);
                Self::notify(&mut inner, true);
            }
            Err(err) => warn!(%id, %err, "local write dropped, payload failed to serialize"),
        }
    }

    /// Write API: delete an item. Deleting an unknown id is a no-op.
    pub fn delete(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.remove(id).is_some() {
            Self::notify(&mut inner, true);
        }
    }

    /// Apply a write as if it originated from another participant; the
    /// resulting delivery carries `local_origin = false`.
    pub fn deliver_remote(&self, id: &str, payload: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.insert(id.to_string(), payload);
        Self::notify(&mut inner, false);
    }

    /// Remove an item as if deleted by another participant.
    pub fn remove_remote(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.remove(id).is_some() {
            Self::notify(&mut inner, false);
        }
    }

    fn snapshot_of(items: &BTreeMap<String, Value>, local_origin: bool) -> RawSnapshot {
        RawSnapshot {
            items: items
                .iter()
                .map(|(id, payload)| RawItem::new(id.clone(), payload.clone()))
                .collect(),
            local_origin,
        }
    }

    fn notify(inner: &mut Inner, local_origin: bool) {
        let snapshot = Self::snapshot_of(&inner.items, local_origin);
        // Drop subscribers whose queues are gone; a full queue loses the
        // delivery rather than blocking the writer, matching how the real
        // transport coalesces snapshots under backpressure.
        inner.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("subscriber queue full, snapshot dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_delivers_current_snapshot() {
        let coll = MemoryCollection::new("chat");
        coll.deliver_remote("m1", json!({"body": "hi"}));

        let (tx, mut rx) = mpsc::channel(8);
        coll.subscribe(tx);

        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].id, "m1");
        assert!(!snap.local_origin);
    }

    #[tokio::test]
    async fn test_local_writes_flagged_local_origin() {
        let coll = MemoryCollection::new("chat");
        let (tx, mut rx) = mpsc::channel(8);
        coll.subscribe(tx);
        let _ = rx.recv().await.unwrap(); // initial empty snapshot

        let id = coll.add(&json!({"body": "hello"}));
        assert_eq!(id, "chat-1");

        let snap = rx.recv().await.unwrap();
        assert!(snap.local_origin);
        assert_eq!(snap.items[0].id, "chat-1");
    }

    #[tokio::test]
    async fn test_unserializable_write_dropped() {
        let coll = MemoryCollection::new("chat");
        let (tx, mut rx) = mpsc::channel(8);
        coll.subscribe(tx);
        let _ = rx.recv().await.unwrap();

        // tuple map keys cannot serialize to JSON object keys
        let bad: std::collections::HashMap<(u8, u8), u8> =
            std::collections::HashMap::from([((1, 2), 3)]);
        coll.add(&bad);

        // nothing was stored and no snapshot went out
        assert!(rx.try_recv().is_err());

        coll.add(&json!({"ok": true}));
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].id, "chat-2");
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_silent() {
        let coll = MemoryCollection::new("chat");
        let (tx, mut rx) = mpsc::channel(8);
        coll.subscribe(tx);
        let _ = rx.recv().await.unwrap();

        coll.delete("nope");
        assert!(rx.try_recv().is_err());
    }
}
