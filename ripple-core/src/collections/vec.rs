//! Reactive vector.
//!
//! Index reads track `Key(i)`, `len` tracks `Length`, and anything that
//! walks the contents tracks `Iterate`. Writes run inside a batch with
//! tracking paused, so a mutator called from an effect never subscribes
//! that effect to the vector it is mutating.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{cached_or_insert, forget_cached, Readonly, TargetDeps, TrackKey, Trackable};
use crate::error::ReactiveError;
use crate::reactive::{Runtime, WeakRuntime};

struct VecInner<T> {
    raw: Rc<RefCell<Vec<T>>>,
    deps: TargetDeps<usize>,
    runtime: WeakRuntime,
}

impl<T> Drop for VecInner<T> {
    fn drop(&mut self) {
        forget_cached(&self.runtime, &self.raw);
    }
}

/// A vector whose reads are tracked per index.
pub struct ReactiveVec<T> {
    inner: Rc<VecInner<T>>,
}

impl<T> Clone for ReactiveVec<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> ReactiveVec<T> {
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_raw(runtime, Rc::new(RefCell::new(Vec::new())))
    }

    /// Wrap `raw`, reusing the existing handle if it is already wrapped.
    pub fn from_raw(runtime: &Runtime, raw: Rc<RefCell<Vec<T>>>) -> Self {
        let inner = cached_or_insert(runtime, &raw, || {
            Rc::new(VecInner {
                raw: Rc::clone(&raw),
                deps: TargetDeps::new(runtime),
                runtime: runtime.downgrade(),
            })
        });
        Self { inner }
    }

    /// Borrow the element at `index`, tracking the read.
    pub fn with<R>(&self, index: usize, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.inner.deps.track_key(TrackKey::Key(index));
        f(self.inner.raw.borrow().get(index))
    }

    pub fn len(&self) -> usize {
        self.inner.deps.track_key(TrackKey::Length);
        self.inner.raw.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, value: T) {
        self.mutate(|| {
            let index = {
                let mut raw = self.inner.raw.borrow_mut();
                raw.push(value);
                raw.len() - 1
            };
            self.trigger_shift(index, Some(index + 1));
        });
    }

    pub fn pop(&self) -> Option<T> {
        self.mutate(|| {
            let (popped, len) = {
                let mut raw = self.inner.raw.borrow_mut();
                let popped = raw.pop();
                (popped, raw.len())
            };
            if popped.is_some() {
                self.trigger_shift(len, None);
            }
            popped
        })
    }

    /// Insert `value` at `index`, shifting later elements up.
    pub fn insert(&self, index: usize, value: T) -> Result<(), ReactiveError> {
        self.mutate(|| {
            let len = {
                let mut raw = self.inner.raw.borrow_mut();
                let len = raw.len();
                if index > len {
                    return Err(ReactiveError::IndexOutOfBounds { index, len });
                }
                raw.insert(index, value);
                len + 1
            };
            self.trigger_shift(index, Some(len));
            Ok(())
        })
    }

    /// Remove the element at `index`, shifting later elements down.
    pub fn remove(&self, index: usize) -> Result<T, ReactiveError> {
        self.mutate(|| {
            let removed = {
                let mut raw = self.inner.raw.borrow_mut();
                let len = raw.len();
                if index >= len {
                    return Err(ReactiveError::IndexOutOfBounds { index, len });
                }
                raw.remove(index)
            };
            self.trigger_shift(index, None);
            Ok(removed)
        })
    }

    /// Shorten the vector to `len` elements. Does nothing if it is
    /// already that short.
    pub fn truncate(&self, len: usize) {
        self.mutate(|| {
            let shrunk = {
                let mut raw = self.inner.raw.borrow_mut();
                let shrunk = len < raw.len();
                raw.truncate(len);
                shrunk
            };
            if shrunk {
                self.trigger_shift(len, None);
            }
        });
    }

    pub fn clear(&self) {
        self.truncate(0);
    }

    pub fn readonly(&self) -> Readonly<Self> {
        Readonly::new(self.clone())
    }

    pub fn to_raw(&self) -> Rc<RefCell<Vec<T>>> {
        Rc::clone(&self.inner.raw)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn mutate<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.batch(|| runtime.untracked(f)),
            None => f(),
        }
    }

    /// Trigger `Length`, `Iterate` and every index in `start..end`
    /// (unbounded when `end` is `None`).
    fn trigger_shift(&self, start: usize, end: Option<usize>) {
        tracing::trace!(start, ?end, "vector length changed");
        self.inner.deps.trigger_where(|key| match key {
            TrackKey::Key(index) => *index >= start && end.map_or(true, |end| *index < end),
            TrackKey::Length | TrackKey::Iterate => true,
            TrackKey::KeyIterate => false,
        });
    }
}

impl<T: Clone + 'static> ReactiveVec<T> {
    /// Get the element at `index`, tracking the read.
    pub fn get(&self, index: usize) -> Option<T> {
        self.with(index, |value| value.cloned())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().clone()
    }

    /// Visit a snapshot of the elements. `f` may write to the vector.
    pub fn for_each(&self, mut f: impl FnMut(usize, &T)) {
        for (index, value) in self.to_vec().iter().enumerate() {
            f(index, value);
        }
    }
}

impl<T: PartialEq + 'static> ReactiveVec<T> {
    /// Write `value` at `index`.
    ///
    /// Replacing an element returns the old one and triggers only if the
    /// value changed. Writing at `len` appends. Writing past `len` fails;
    /// the length read is still tracked so the caller re-runs once the
    /// vector grows.
    pub fn set(&self, index: usize, value: T) -> Result<Option<T>, ReactiveError> {
        let len = self.inner.raw.borrow().len();
        if index > len {
            self.inner.deps.track_key(TrackKey::Length);
            return Err(ReactiveError::IndexOutOfBounds { index, len });
        }
        if index == len {
            self.push(value);
            return Ok(None);
        }
        self.mutate(|| {
            let (old, changed) = {
                let mut raw = self.inner.raw.borrow_mut();
                let changed = raw[index] != value;
                (std::mem::replace(&mut raw[index], value), changed)
            };
            if changed {
                self.inner
                    .deps
                    .trigger_many([TrackKey::Key(index), TrackKey::Iterate]);
            }
            Ok(Some(old))
        })
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().contains(value)
    }

    pub fn position(&self, value: &T) -> Option<usize> {
        self.inner.deps.track_key(TrackKey::Iterate);
        self.inner.raw.borrow().iter().position(|item| item == value)
    }
}

impl<T: 'static> Trackable for ReactiveVec<T> {
    type Key = usize;

    fn track_key(&self, key: TrackKey<usize>) {
        self.inner.deps.track_key(key);
    }

    fn trigger_key(&self, key: TrackKey<usize>) {
        self.inner.deps.trigger_key(key);
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.raw.try_borrow() {
            Ok(raw) => f.debug_list().entries(raw.iter()).finish(),
            Err(_) => f.write_str("ReactiveVec { <borrowed> }"),
        }
    }
}

impl Runtime {
    pub fn reactive_vec<T: 'static>(&self) -> ReactiveVec<T> {
        ReactiveVec::new(self)
    }

    pub fn reactive_vec_from_raw<T: 'static>(&self, raw: Rc<RefCell<Vec<T>>>) -> ReactiveVec<T> {
        ReactiveVec::from_raw(self, raw)
    }
}
