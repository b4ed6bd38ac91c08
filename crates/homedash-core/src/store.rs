// ── Entity state cache ──
//
// Holds the most recent entity map. Every snapshot from the hub replaces
// the map wholesale; readers get an `Arc` to an immutable map and never
// observe a partial update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use homedash_api::{EntityMap, EntityState, EntitySubscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stream::EntityStream;

/// Reactive entity id → state map.
pub struct EntityStore {
    snapshot: watch::Sender<Arc<EntityMap>>,
    last_update: watch::Sender<Option<DateTime<Utc>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(EntityMap::new()));
        let (last_update, _) = watch::channel(None);
        Self {
            snapshot,
            last_update,
        }
    }

    /// Replace the whole map. Last call wins.
    pub fn apply(&self, snapshot: Arc<EntityMap>) {
        self.snapshot.send_replace(snapshot);
        self.last_update.send_replace(Some(Utc::now()));
    }

    /// Consume `subscription` until it ends or `cancel` fires, applying
    /// each snapshot in arrival order.
    pub fn follow(
        self: &Arc<Self>,
        mut subscription: EntitySubscription,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    snapshot = subscription.next_snapshot() => {
                        let Some(snapshot) = snapshot else { break };
                        store.apply(snapshot);
                    }
                }
            }
            debug!("entity feed ended");
        })
    }

    // ── Readers ──────────────────────────────────────────────────────

    /// Current map (cheap `Arc` clone). Empty before the first update.
    pub fn snapshot(&self) -> Arc<EntityMap> {
        self.snapshot.borrow().clone()
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntityState> {
        self.snapshot.borrow().get(entity_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.borrow().is_empty()
    }

    /// When the last snapshot arrived.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.borrow()
    }

    pub fn subscribe(&self) -> EntityStream {
        EntityStream::new(self.snapshot.subscribe())
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use homedash_api::{Context, FeedItem};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn entity(id: &str, state: &str) -> (String, EntityState) {
        (
            id.to_owned(),
            EntityState {
                entity_id: id.to_owned(),
                state: state.to_owned(),
                attributes: serde_json::Map::new(),
                last_changed: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                last_updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                context: Context::default(),
            },
        )
    }

    fn map(entries: &[(&str, &str)]) -> Arc<EntityMap> {
        Arc::new(entries.iter().map(|(id, s)| entity(id, s)).collect())
    }

    #[test]
    fn empty_before_first_update() {
        let store = EntityStore::new();
        assert!(store.is_empty());
        assert!(store.last_update().is_none());
        assert!(store.entity("light.kitchen").is_none());
    }

    #[test]
    fn snapshot_replaces_map_exactly() {
        let store = EntityStore::new();
        store.apply(map(&[("light.a", "on"), ("light.b", "off")]));

        let next = map(&[("switch.c", "on")]);
        store.apply(Arc::clone(&next));

        assert_eq!(*store.snapshot(), *next);
        assert_eq!(store.len(), 1);
        assert!(store.entity("light.a").is_none());
        assert!(store.last_update().is_some());
    }

    #[tokio::test]
    async fn stream_sees_each_snapshot() {
        let store = EntityStore::new();
        let mut stream = store.subscribe();
        assert!(stream.current().is_empty());

        store.apply(map(&[("light.a", "on")]));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap["light.a"].state, "on");
        assert_eq!(stream.current()["light.a"].state, "on");

        store.apply(map(&[("light.a", "off")]));
        assert_eq!(stream.latest()["light.a"].state, "off");
    }

    #[tokio::test]
    async fn into_stream_yields_current_first() {
        let store = EntityStore::new();
        store.apply(map(&[("light.a", "on")]));

        let mut stream = store.subscribe().into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn follow_applies_feed_in_order() {
        let store = Arc::new(EntityStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut changes = store.subscribe();

        let task = store.follow(EntitySubscription::new(rx), CancellationToken::new());

        tx.send(FeedItem::Event(json!({"a": {"light.a": {"s": "on", "c": "x", "lc": 1.0}}})))
            .unwrap();
        let first = changes.changed().await.unwrap();
        assert_eq!(first["light.a"].state, "on");

        tx.send(FeedItem::Event(json!({
            "r": ["light.a"],
            "a": {"light.b": {"s": "off", "c": "y", "lc": 2.0}}
        })))
        .unwrap();
        let second = changes.changed().await.unwrap();
        assert!(!second.contains_key("light.a"));
        assert_eq!(second["light.b"].state, "off");

        drop(tx);
        task.await.unwrap();
        // The last snapshot survives the end of the feed.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn follow_stops_on_cancel() {
        let store = Arc::new(EntityStore::new());
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = store.follow(EntitySubscription::new(rx), cancel.clone());
        cancel.cancel();
        task.await.unwrap();
    }
}
