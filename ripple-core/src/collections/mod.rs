//! Tracking Collections
//!
//! Reactive wrappers around plain containers. Every read goes through a
//! method that tracks the key it touched, and every write triggers exactly
//! the keys whose readers could observe the change.
//!
//! # Keys
//!
//! Besides one dependency per element key, each container has synthetic
//! keys for whole-container reads:
//!
//! - `Iterate`: anything that walks the contents (`len` of a map, `values`,
//!   `for_each`, `contains` on a vector)
//! - `KeyIterate`: map key listings, which do not care about value changes
//! - `Length`: the length of a vector
//!
//! Dependencies are created lazily on the first tracked read of a key and
//! are released with the container.
//!
//! # Identity
//!
//! Wrapping the same raw storage twice with a `*_from_raw` constructor
//! returns the same handle, so handle identity follows storage identity.

mod map;
mod readonly;
mod set;
mod vec;

use std::any::Any;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::DepId;
use crate::reactive::{Runtime, WeakRuntime};

pub use map::ReactiveMap;
pub use readonly::Readonly;
pub use set::ReactiveSet;
pub use vec::ReactiveVec;

/// What a read depended on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey<K> {
    Key(K),
    Iterate,
    KeyIterate,
    Length,
}

/// The kind of write being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing key got a different value.
    Set,
    /// A new key appeared.
    Add,
    /// A key went away.
    Delete,
    /// Everything went away.
    Clear,
}

/// Something whose reads and writes can be reported per key.
pub trait Trackable {
    type Key;

    /// Record a read of `key` by the running subscriber.
    fn track_key(&self, key: TrackKey<Self::Key>);

    /// Notify the subscribers of `key`.
    fn trigger_key(&self, key: TrackKey<Self::Key>);
}

/// Per-container dependency map.
pub struct TargetDeps<K: Hash + Eq> {
    deps: RefCell<IndexMap<TrackKey<K>, DepId>>,
    runtime: WeakRuntime,
}

impl<K: Hash + Eq + Clone> TargetDeps<K> {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            deps: RefCell::new(IndexMap::new()),
            runtime: runtime.downgrade(),
        }
    }

    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    /// The dependency backing `key`, if one was created.
    pub fn dep(&self, key: &TrackKey<K>) -> Option<DepId> {
        self.deps.borrow().get(key).copied()
    }

    /// Number of keys that have been read while tracking.
    pub fn len(&self) -> usize {
        self.deps.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.borrow().is_empty()
    }

    /// Trigger the keys a write of kind `op` on `key` invalidates.
    /// `iterate_keys` lists the synthetic keys that also change.
    pub(crate) fn trigger_op(&self, op: TriggerOp, key: K, iterate_keys: &[TrackKey<K>]) {
        tracing::trace!(?op, "container write");
        if op == TriggerOp::Clear {
            self.trigger_all();
            return;
        }
        let keys = std::iter::once(TrackKey::Key(key)).chain(iterate_keys.iter().cloned());
        self.trigger_many(keys);
    }

    /// Trigger every dependency of the container.
    pub(crate) fn trigger_all(&self) {
        let deps: SmallVec<[DepId; 8]> = self.deps.borrow().values().copied().collect();
        self.trigger_deps(deps);
    }

    /// Trigger every key matching `pred`.
    pub(crate) fn trigger_where(&self, pred: impl Fn(&TrackKey<K>) -> bool) {
        let deps: SmallVec<[DepId; 8]> = self
            .deps
            .borrow()
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(_, dep)| *dep)
            .collect();
        self.trigger_deps(deps);
    }

    pub(crate) fn trigger_many(&self, keys: impl IntoIterator<Item = TrackKey<K>>) {
        let deps: SmallVec<[DepId; 8]> = {
            let map = self.deps.borrow();
            keys.into_iter().filter_map(|key| map.get(&key).copied()).collect()
        };
        self.trigger_deps(deps);
    }

    fn trigger_deps(&self, deps: SmallVec<[DepId; 8]>) {
        if deps.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else { return };
        runtime.batch(|| {
            for dep in deps {
                runtime.trigger(dep);
            }
        });
    }
}

impl<K: Hash + Eq + Clone> Trackable for TargetDeps<K> {
    type Key = K;

    fn track_key(&self, key: TrackKey<K>) {
        let Some(runtime) = self.runtime.upgrade() else { return };
        if !runtime.is_tracking() {
            return;
        }
        let existing = self.deps.borrow().get(&key).copied();
        let dep = match existing {
            Some(dep) => dep,
            None => {
                let dep = runtime.create_dep();
                self.deps.borrow_mut().insert(key, dep);
                dep
            }
        };
        runtime.track(dep);
    }

    fn trigger_key(&self, key: TrackKey<K>) {
        self.trigger_many([key]);
    }
}

impl<K: Hash + Eq> Drop for TargetDeps<K> {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.upgrade() else { return };
        for dep in self.deps.get_mut().values() {
            runtime.release_dep(*dep);
        }
    }
}

/// Identity of a raw storage allocation.
fn raw_key<T>(raw: &Rc<RefCell<T>>) -> usize {
    Rc::as_ptr(raw) as *const () as usize
}

/// Return the container cached for `raw`, or build and cache a new one.
fn cached_or_insert<T, P>(
    runtime: &Runtime,
    raw: &Rc<RefCell<T>>,
    build: impl FnOnce() -> Rc<P>,
) -> Rc<P>
where
    P: Any,
{
    let key = raw_key(raw);
    if let Some(existing) = runtime.cached_proxy::<P>(key) {
        return existing;
    }
    let proxy = build();
    runtime.register_proxy(key, &proxy);
    proxy
}

/// Drop-side half of the cache: forget the entry for `raw`.
fn forget_cached<T>(runtime: &WeakRuntime, raw: &Rc<RefCell<T>>) {
    if let Some(runtime) = runtime.upgrade() {
        runtime.forget_proxy(raw_key(raw));
    }
}
