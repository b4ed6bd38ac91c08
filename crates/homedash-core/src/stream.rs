// ── Reactive entity streams ──
//
// Subscription handle for consuming entity map snapshots from the
// EntityStore.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use homedash_api::EntityMap;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to the entity map.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via [`changed()`](Self::changed) or by converting to a
/// `Stream`.
pub struct EntityStream {
    current: Arc<EntityMap>,
    receiver: watch::Receiver<Arc<EntityMap>>,
}

impl EntityStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<EntityMap>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> &Arc<EntityMap> {
        &self.current
    }

    /// Latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<EntityMap> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot.
    /// Returns `None` if the EntityStore has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<EntityMap>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators. The
    /// first item is the current snapshot.
    pub fn into_stream(self) -> EntityWatchStream {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct EntityWatchStream {
    inner: WatchStream<Arc<EntityMap>>,
}

impl Stream for EntityWatchStream {
    type Item = Arc<EntityMap>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
