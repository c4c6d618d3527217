//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and one
//! dependency in the runtime's graph.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running effect or computed, the
//!    runtime links the signal's dependency to that subscriber.
//!
//! 2. When a signal's value changes, the dependency is triggered and every
//!    linked subscriber is notified.
//!
//! 3. Writing an equal value is a no-op; use [`Signal::update`] or
//!    [`Signal::trigger`] to force a notification after in-place changes.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A dependency key into the graph arena (8 bytes)
//! - The value, behind a shared `RefCell`
//! - A weak handle to its runtime

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::DepId;

struct SignalInner<T> {
    value: RefCell<T>,
    dep: DepId,
    runtime: WeakRuntime,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_dep(self.dep);
        }
    }
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning a signal yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                dep: runtime.create_dep(),
                runtime: runtime.downgrade(),
            }),
        }
    }

    /// The signal's dependency key.
    pub fn id(&self) -> DepId {
        self.inner.dep
    }

    /// Record a read of this signal by the running subscriber, if any.
    pub fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.dep);
        }
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.dep);
        }
    }

    /// Borrow the value, tracking the read.
    ///
    /// The value stays borrowed while `f` runs, so `f` must not write to
    /// this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Borrow the value without tracking the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Mutate the value in place and notify subscribers unconditionally.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.inner.value.borrow_mut());
        self.trigger();
    }

    /// Replace the value without notifying anyone.
    pub fn set_untracked(&self, value: T) -> T {
        self.inner.value.replace(value)
    }

    /// Version of the signal's dependency. Bumped on every trigger.
    pub fn dep_version(&self) -> u64 {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dep_version(self.inner.dep))
    }

    /// Number of subscribers currently linked to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.subscriber_count(self.inner.dep))
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called while an effect or computed is running, this also
    /// registers that computation as a subscriber.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Set a new value. Subscribers are notified only if it differs from
    /// the current one.
    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value;
        }
        self.trigger();
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Signal");
        out.field("id", &self.inner.dep);
        match self.inner.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<borrowed>"),
        };
        out.finish()
    }
}

impl Runtime {
    /// Create a signal owned by this runtime.
    pub fn signal<T: 'static>(&self, value: T) -> Signal<T> {
        Signal::new(self, value)
    }
}
