//! Reactive keyed container.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use super::{cached_or_insert, forget_cached, Readonly, TargetDeps, TrackKey, Trackable, TriggerOp};
use crate::reactive::{Runtime, WeakRuntime};

/// How writes invalidate iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// Changing a value invalidates value iteration; key listings track
    /// only additions and removals.
    Map,
    /// A record: only adding or removing fields invalidates iteration.
    Object,
}

struct MapInner<K: Hash + Eq, V> {
    raw: Rc<RefCell<IndexMap<K, V>>>,
    deps: TargetDeps<K>,
    flavor: Flavor,
    runtime: WeakRuntime,
}

impl<K: Hash + Eq, V> Drop for MapInner<K, V> {
    fn drop(&mut self) {
        forget_cached(&self.runtime, &self.raw);
    }
}

/// A map whose reads are tracked per key.
///
/// Entries keep insertion order. Removing an entry shifts later entries
/// down, so iteration order always matches insertion order.
pub struct ReactiveMap<K: Hash + Eq, V> {
    inner: Rc<MapInner<K, V>>,
}

impl<K: Hash + Eq, V> Clone for ReactiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: 'static,
{
    /// Wrap fresh storage with map semantics.
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_raw(runtime, Rc::new(RefCell::new(IndexMap::new())))
    }

    /// Wrap `raw` with map semantics, reusing the existing handle if `raw`
    /// is already wrapped.
    ///
    /// Storage has one handle at a time, so every reader shares the same
    /// dependencies. If `raw` is already wrapped as an object, that handle
    /// is returned and keeps its object semantics.
    pub fn from_raw(runtime: &Runtime, raw: Rc<RefCell<IndexMap<K, V>>>) -> Self {
        Self::wrap(runtime, raw, Flavor::Map)
    }

    /// Wrap fresh storage with record semantics.
    pub fn object(runtime: &Runtime) -> Self {
        Self::object_from_raw(runtime, Rc::new(RefCell::new(IndexMap::new())))
    }

    /// Wrap `raw` with record semantics. Like [`ReactiveMap::from_raw`], an
    /// existing handle wins and keeps the flavour it was created with.
    pub fn object_from_raw(runtime: &Runtime, raw: Rc<RefCell<IndexMap<K, V>>>) -> Self {
        Self::wrap(runtime, raw, Flavor::Object)
    }

    fn wrap(runtime: &Runtime, raw: Rc<RefCell<IndexMap<K, V>>>, flavor: Flavor) -> Self {
        let inner = cached_or_insert(runtime, &raw, || {
            Rc::new(MapInner {
                raw: Rc::clone(&raw),
                deps: TargetDeps::new(runtime),
                flavor,
                runtime: runtime.downgrade(),
            })
        });
        if inner.flavor != flavor {
            tracing::warn!(
                requested = ?flavor,
                existing = ?inner.flavor,
                "storage already wrapped with another flavour; reusing the existing handle"
            );
        }
        Self { inner }
    }

    /// Borrow the value under `key`, tracking the read.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(Option<&V>) -> R) -> R {
        self.inner.deps.track_key(TrackKey::Key(key.clone()));
        f(self.inner.raw.borrow().get(key))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.deps.track_key(TrackKey::Key(key.clone()));
        self.inner.raw.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        let key = match self.inner.flavor {
            Flavor::Map => TrackKey::KeyIterate,
            Flavor::Object => TrackKey::Iterate,
        };
        self.inner.deps.track_key(key);
        self.inner.raw.borrow().keys().cloned().collect()
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.inner.raw.borrow_mut().shift_remove(key);
        if removed.is_some() {
            self.trigger(TriggerOp::Delete, key.clone());
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let had_entries = {
            let mut raw = self.inner.raw.borrow_mut();
            let had_entries = !raw.is_empty();
            raw.clear();
            had_entries
        };
        if had_entries {
            self.inner.deps.trigger_all();
        }
    }

    /// A view that reads through this map and ignores writes.
    pub fn readonly(&self) -> Readonly<Self> {
        Readonly::new(self.clone())
    }

    /// The wrapped storage. Writes made through it are not tracked.
    pub fn to_raw(&self) -> Rc<RefCell<IndexMap<K, V>>> {
        Rc::clone(&self.inner.raw)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_object(&self) -> bool {
        self.inner.flavor == Flavor::Object
    }

    fn trigger(&self, op: TriggerOp, key: K) {
        let iterate: SmallVec<[TrackKey<K>; 2]> = match (self.inner.flavor, op) {
            (Flavor::Map, TriggerOp::Set) => smallvec![TrackKey::Iterate],
            (Flavor::Map, _) => smallvec![TrackKey::Iterate, TrackKey::KeyIterate],
            (Flavor::Object, TriggerOp::Set) => SmallVec::new(),
            (Flavor::Object, _) => smallvec![TrackKey::Iterate],
        };
        self.inner.deps.trigger_op(op, key, &iterate);
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    /// Get the value under `key`, tracking the read.
    pub fn get(&self, key: &K) -> Option<V> {
        self.with(key, |value| value.cloned())
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner
            .raw
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Visit a snapshot of the entries. `f` may write to the map.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (key, value) in self.entries() {
            f(&key, &value);
        }
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + 'static,
{
    /// Insert or replace. Readers are notified only if the key is new or
    /// the value differs. Returns the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let (previous, changed) = {
            let mut raw = self.inner.raw.borrow_mut();
            let changed = raw.get(&key).map(|old| *old != value);
            (raw.insert(key.clone(), value), changed)
        };
        match changed {
            None => self.trigger(TriggerOp::Add, key),
            Some(true) => self.trigger(TriggerOp::Set, key),
            Some(false) => {}
        }
        previous
    }
}

impl<K, V> Trackable for ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: 'static,
{
    type Key = K;

    fn track_key(&self, key: TrackKey<K>) {
        self.inner.deps.track_key(key);
    }

    fn trigger_key(&self, key: TrackKey<K>) {
        self.inner.deps.trigger_key(key);
    }
}

impl<K, V> fmt::Debug for ReactiveMap<K, V>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.raw.try_borrow() {
            Ok(raw) => f.debug_map().entries(raw.iter()).finish(),
            Err(_) => f.write_str("ReactiveMap { <borrowed> }"),
        }
    }
}

impl Runtime {
    /// Create an empty map with map semantics.
    pub fn reactive_map<K, V>(&self) -> ReactiveMap<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: 'static,
    {
        ReactiveMap::new(self)
    }

    pub fn reactive_map_from_raw<K, V>(&self, raw: Rc<RefCell<IndexMap<K, V>>>) -> ReactiveMap<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: 'static,
    {
        ReactiveMap::from_raw(self, raw)
    }

    /// Create an empty record: a keyed container where only adding or
    /// removing fields invalidates iteration.
    pub fn reactive_object<K, V>(&self) -> ReactiveMap<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: 'static,
    {
        ReactiveMap::object(self)
    }

    pub fn reactive_object_from_raw<K, V>(
        &self,
        raw: Rc<RefCell<IndexMap<K, V>>>,
    ) -> ReactiveMap<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: 'static,
    {
        ReactiveMap::object_from_raw(self, raw)
    }
}
