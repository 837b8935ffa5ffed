// ── Owning keyed registry ──
//
// Single-writer ordered map with push-based change notification via
// `watch` channels. Inserting under an occupied key hands the superseded
// record back to the caller instead of discarding it silently.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

/// Outcome of [`Registry::insert`].
#[derive(Debug)]
pub enum Insert<V> {
    /// The key was vacant.
    New,
    /// An equal record was already stored; nothing changed.
    Unchanged,
    /// A different record was stored under the key and has been replaced.
    Replaced(Arc<V>),
}

impl<V> Insert<V> {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl<V> PartialEq for Insert<V> {
    /// Compares outcomes only; replaced payloads are not compared.
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::New, Self::New)
                | (Self::Unchanged, Self::Unchanged)
                | (Self::Replaced(_), Self::Replaced(_))
        )
    }
}

/// An ordered collection for a single record type.
///
/// Mutations happen on one task only; every mutation bumps a version
/// counter and rebuilds the snapshot that subscribers receive.
pub(crate) struct Registry<K: Ord + Copy, V: Send + Sync + 'static> {
    by_key: BTreeMap<K, Arc<V>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot in key order, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<V>>>>,
}

impl<K: Ord + Copy, V: Clone + PartialEq + Send + Sync + 'static> Registry<K, V> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: BTreeMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert `value` under `key`, returning what happened to the slot.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Insert<V> {
        if let Some(existing) = self.by_key.get(&key) {
            if **existing == value {
                return Insert::Unchanged;
            }
        }
        let previous = self.by_key.insert(key, Arc::new(value));
        self.publish();
        match previous {
            Some(old) => Insert::Replaced(old),
            None => Insert::New,
        }
    }

    /// Remove a record, handing ownership to the caller.
    pub(crate) fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let removed = self.by_key.remove(key);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.by_key.get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Mutate a stored record in place. Returns `false` if `key` is vacant.
    pub(crate) fn update(&mut self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let Some(slot) = self.by_key.get_mut(key) else {
            return false;
        };
        f(Arc::make_mut(slot));
        self.publish();
        true
    }

    pub(crate) fn find(&self, pred: impl Fn(&V) -> bool) -> Option<Arc<V>> {
        self.by_key.values().find(|v| pred(v)).cloned()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<V>> {
        self.by_key.values()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
        self.by_key.keys()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<V>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<V>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Drop every record.
    pub(crate) fn clear(&mut self) {
        if self.by_key.is_empty() {
            return;
        }
        self.by_key.clear();
        self.publish();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let values: Vec<Arc<V>> = self.by_key.values().cloned().collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
