// ── Reactive record streams ──
//
// Read-only subscriptions to device-database collections. Observers on
// other tasks see snapshots only; they never touch the worker's state.

use std::sync::Arc;

use tokio::sync::watch;

/// A subscription to one collection of records.
///
/// Provides both point-in-time snapshot access and change notification
/// via [`changed()`](Self::changed).
pub struct EntityStream<T: Send + Sync + 'static> {
    current: Arc<Vec<Arc<T>>>,
    receiver: watch::Receiver<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> Clone for EntityStream<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Vec<Arc<T>>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &Arc<Vec<Arc<T>>> {
        &self.current
    }

    /// Latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Arc<Vec<Arc<T>>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change and return the new snapshot.
    /// Returns `None` once the owning database has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Vec<Arc<T>>>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }
}
