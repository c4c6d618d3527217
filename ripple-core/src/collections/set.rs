//! Reactive set.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexSet;

use super::{cached_or_insert, forget_cached, Readonly, TargetDeps, TrackKey, Trackable, TriggerOp};
use crate::reactive::{Runtime, WeakRuntime};

struct SetInner<T: Hash + Eq> {
    raw: Rc<RefCell<IndexSet<T>>>,
    deps: TargetDeps<T>,
    runtime: WeakRuntime,
}

impl<T: Hash + Eq> Drop for SetInner<T> {
    fn drop(&mut self) {
        forget_cached(&self.runtime, &self.raw);
    }
}

/// A set whose membership reads are tracked per value.
pub struct ReactiveSet<T: Hash + Eq> {
    inner: Rc<SetInner<T>>,
}

impl<T: Hash + Eq> Clone for ReactiveSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> ReactiveSet<T>
where
    T: Hash + Eq + Clone + 'static,
{
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_raw(runtime, Rc::new(RefCell::new(IndexSet::new())))
    }

    /// Wrap `raw`, reusing the existing handle if it is already wrapped.
    pub fn from_raw(runtime: &Runtime, raw: Rc<RefCell<IndexSet<T>>>) -> Self {
        let inner = cached_or_insert(runtime, &raw, || {
            Rc::new(SetInner {
                raw: Rc::clone(&raw),
                deps: TargetDeps::new(runtime),
                runtime: runtime.downgrade(),
            })
        });
        Self { inner }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.deps.track_key(TrackKey::Key(value.clone()));
        self.inner.raw.borrow().contains(value)
    }

    pub fn len(&self) -> usize {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<T> {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().iter().cloned().collect()
    }

    /// Visit a snapshot of the values. `f` may write to the set.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for value in self.values() {
            f(&value);
        }
    }

    /// Add `value`. Returns whether it was new.
    pub fn insert(&self, value: T) -> bool {
        let added = self.inner.raw.borrow_mut().insert(value.clone());
        if added {
            self.inner
                .deps
                .trigger_op(TriggerOp::Add, value, &[TrackKey::Iterate]);
        }
        added
    }

    /// Remove `value`. Returns whether it was present.
    pub fn remove(&self, value: &T) -> bool {
        let removed = self.inner.raw.borrow_mut().shift_remove(value);
        if removed {
            self.inner
                .deps
                .trigger_op(TriggerOp::Delete, value.clone(), &[TrackKey::Iterate]);
        }
        removed
    }

    pub fn clear(&self) {
        let had_values = {
            let mut raw = self.inner.raw.borrow_mut();
            let had_values = !raw.is_empty();
            raw.clear();
            had_values
        };
        if had_values {
            self.inner.deps.trigger_all();
        }
    }

    pub fn readonly(&self) -> Readonly<Self> {
        Readonly::new(self.clone())
    }

    pub fn to_raw(&self) -> Rc<RefCell<IndexSet<T>>> {
        Rc::clone(&self.inner.raw)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Trackable for ReactiveSet<T>
where
    T: Hash + Eq + Clone + 'static,
{
    type Key = T;

    fn track_key(&self, key: TrackKey<T>) {
        self.inner.deps.track_key(key);
    }

    fn trigger_key(&self, key: TrackKey<T>) {
        self.inner.deps.trigger_key(key);
    }
}

impl<T: Hash + Eq + fmt::Debug> fmt::Debug for ReactiveSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.raw.try_borrow() {
            Ok(raw) => f.debug_set().entries(raw.iter()).finish(),
            Err(_) => f.write_str("ReactiveSet { <borrowed> }"),
        }
    }
}

impl Runtime {
    pub fn reactive_set<T>(&self) -> ReactiveSet<T>
    where
        T: Hash + Eq + Clone + 'static,
    {
        ReactiveSet::new(self)
    }

    pub fn reactive_set_from_raw<T>(&self, raw: Rc<RefCell<IndexSet<T>>>) -> ReactiveSet<T>
    where
        T: Hash + Eq + Clone + 'static,
    {
        ReactiveSet::from_raw(self, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn membership_reads_track_their_value() {
        let rt = Runtime::new();
        let set: ReactiveSet<u32> = rt.reactive_set();
        let runs = Rc::new(Cell::new(0));
        let _effect = {
            let (set, runs) = (set.clone(), Rc::clone(&runs));
            rt.effect(move || {
                set.contains(&7);
                runs.set(runs.get() + 1);
            })
        };

        set.insert(1);
        assert_eq!(runs.get(), 1);
        set.insert(7);
        assert_eq!(runs.get(), 2);
        assert!(!set.insert(7));
        assert_eq!(runs.get(), 2);
        set.remove(&7);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn size_reads_see_every_add_and_delete() {
        let rt = Runtime::new();
        let set: ReactiveSet<&str> = rt.reactive_set();
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let _effect = {
            let (set, sizes) = (set.clone(), Rc::clone(&sizes));
            rt.effect(move || sizes.borrow_mut().push(set.len()))
        };

        set.insert("a");
        set.insert("b");
        set.remove(&"missing");
        set.clear();
        assert_eq!(*sizes.borrow(), vec![0, 1, 2, 0]);
    }

    #[test]
    fn same_raw_same_handle() {
        let rt = Runtime::new();
        let raw = Rc::new(RefCell::new(IndexSet::from([1, 2])));
        let a = rt.reactive_set_from_raw(Rc::clone(&raw));
        let b = rt.reactive_set_from_raw(raw);
        assert!(a.ptr_eq(&b));
        assert_eq!(b.values(), vec![1, 2]);
    }
}
