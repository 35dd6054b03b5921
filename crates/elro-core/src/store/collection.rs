// ── Index-keyed reactive collection ──
//
// Concurrent storage keyed by hub index with push-based change
// notification via a `watch` snapshot ordered by index.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::watch;

/// Entities keyed by a 16-bit hub index.
///
/// Every effective mutation rebuilds the snapshot that subscribers receive,
/// so a reader always sees one consistent, index-ordered view. Writers are
/// serialized: a mutation and its snapshot rebuild happen under one lock, so
/// a published snapshot never misses a write that completed before it.
pub(crate) struct IndexedCollection<T: Clone + Send + Sync + 'static> {
    by_index: DashMap<u16, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
    write: Mutex<()>,
}

impl<T: Clone + Send + Sync + 'static> IndexedCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_index: DashMap::new(),
            snapshot,
            write: Mutex::new(()),
        }
    }

    /// Modify the entity at `index`, creating it first if absent.
    ///
    /// `f` returns whether it changed anything; the snapshot is only
    /// rebuilt for changes and creations. Returns the stored entity and
    /// whether it changed (creation counts as a change).
    pub(crate) fn upsert_with(
        &self,
        index: u16,
        create: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> bool,
    ) -> (Arc<T>, bool) {
        let _write = self.write_lock();
        let (entity, changed) = {
            let mut created = false;
            let mut slot = self.by_index.entry(index).or_insert_with(|| {
                created = true;
                Arc::new(create())
            });
            let changed = f(Arc::make_mut(slot.value_mut())) || created;
            (Arc::clone(slot.value()), changed)
        };
        if changed {
            self.rebuild_snapshot();
        }
        (entity, changed)
    }

    /// Modify an existing entity. `None` if `index` is absent.
    pub(crate) fn modify(
        &self,
        index: u16,
        f: impl FnOnce(&mut T) -> bool,
    ) -> Option<(Arc<T>, bool)> {
        let _write = self.write_lock();
        let (entity, changed) = {
            let mut slot = self.by_index.get_mut(&index)?;
            let changed = f(Arc::make_mut(slot.value_mut()));
            (Arc::clone(slot.value()), changed)
        };
        if changed {
            self.rebuild_snapshot();
        }
        Some((entity, changed))
    }

    /// Apply `f` to every entity, returning the ones it changed.
    pub(crate) fn modify_all(&self, mut f: impl FnMut(&mut T) -> bool) -> Vec<Arc<T>> {
        let _write = self.write_lock();
        let mut changed = Vec::new();
        for mut slot in self.by_index.iter_mut() {
            if f(Arc::make_mut(slot.value_mut())) {
                changed.push(Arc::clone(slot.value()));
            }
        }
        if !changed.is_empty() {
            self.rebuild_snapshot();
        }
        changed
    }

    pub(crate) fn get(&self, index: u16) -> Option<Arc<T>> {
        self.by_index.get(&index).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        let _write = self.write_lock();
        self.by_index.clear();
        self.rebuild_snapshot();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_index.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the write lock and no map guard.
    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(u16, Arc<T>)> = self
            .by_index
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();
        entries.sort_unstable_by_key(|(index, _)| *index);
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
