//! Read-only views over reactive containers.
//!
//! A view tracks exactly like the container it wraps. Writes through it are
//! refused: they log a warning and leave the container and its subscribers
//! untouched.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::{ReactiveMap, ReactiveSet, ReactiveVec, TrackKey, Trackable};
use crate::error::ReactiveError;

fn refuse(op: &'static str) {
    tracing::warn!(op, "write through a readonly view ignored");
}

/// A read-only view of `C`.
pub struct Readonly<C> {
    inner: C,
}

impl<C> Readonly<C> {
    pub(crate) fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn is_readonly(&self) -> bool {
        true
    }
}

impl<C: Clone> Readonly<C> {
    /// A view of a view is the same view.
    pub fn readonly(&self) -> Self {
        self.clone()
    }
}

impl<C: Clone> Clone for Readonly<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Readonly<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Readonly").field(&self.inner).finish()
    }
}

impl<C: Trackable> Trackable for Readonly<C> {
    type Key = C::Key;

    fn track_key(&self, key: TrackKey<C::Key>) {
        self.inner.track_key(key);
    }

    fn trigger_key(&self, _key: TrackKey<C::Key>) {
        refuse("trigger");
    }
}

impl<K, V> Readonly<ReactiveMap<K, V>>
where
    K: Hash + Eq + Clone + 'static,
    V: 'static,
{
    pub fn with<R>(&self, key: &K, f: impl FnOnce(Option<&V>) -> R) -> R {
        self.inner.with(key, f)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.keys()
    }

    pub fn set(&self, _key: K, _value: V) -> Option<V> {
        refuse("set");
        None
    }

    pub fn remove(&self, _key: &K) -> Option<V> {
        refuse("remove");
        None
    }

    pub fn clear(&self) {
        refuse("clear");
    }

    pub fn to_raw(&self) -> Rc<RefCell<IndexMap<K, V>>> {
        self.inner.to_raw()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<K, V> Readonly<ReactiveMap<K, V>>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.values()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner.entries()
    }

    pub fn for_each(&self, f: impl FnMut(&K, &V)) {
        self.inner.for_each(f);
    }
}

impl<T> Readonly<ReactiveSet<T>>
where
    T: Hash + Eq + Clone + 'static,
{
    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn values(&self) -> Vec<T> {
        self.inner.values()
    }

    pub fn for_each(&self, f: impl FnMut(&T)) {
        self.inner.for_each(f);
    }

    pub fn insert(&self, _value: T) -> bool {
        refuse("insert");
        false
    }

    pub fn remove(&self, _value: &T) -> bool {
        refuse("remove");
        false
    }

    pub fn clear(&self) {
        refuse("clear");
    }

    pub fn to_raw(&self) -> Rc<RefCell<IndexSet<T>>> {
        self.inner.to_raw()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<T: 'static> Readonly<ReactiveVec<T>> {
    pub fn with<R>(&self, index: usize, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.inner.with(index, f)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push(&self, _value: T) {
        refuse("push");
    }

    pub fn pop(&self) -> Option<T> {
        refuse("pop");
        None
    }

    /// Refused. Reports success so callers written against the writable
    /// vector keep working.
    pub fn insert(&self, _index: usize, _value: T) -> Result<(), ReactiveError> {
        refuse("insert");
        Ok(())
    }

    pub fn remove(&self, _index: usize) -> Option<T> {
        refuse("remove");
        None
    }

    pub fn truncate(&self, _len: usize) {
        refuse("truncate");
    }

    pub fn clear(&self) {
        refuse("clear");
    }

    pub fn to_raw(&self) -> Rc<RefCell<Vec<T>>> {
        self.inner.to_raw()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<T: Clone + 'static> Readonly<ReactiveVec<T>> {
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.get(index)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.to_vec()
    }

    pub fn for_each(&self, f: impl FnMut(usize, &T)) {
        self.inner.for_each(f);
    }
}

impl<T: PartialEq + 'static> Readonly<ReactiveVec<T>> {
    pub fn set(&self, _index: usize, _value: T) -> Result<Option<T>, ReactiveError> {
        refuse("set");
        Ok(None)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    pub fn position(&self, value: &T) -> Option<usize> {
        self.inner.position(value)
    }
}
