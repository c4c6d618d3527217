//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when one of
//! its dependencies really changed.
//!
//! # How Computeds Work
//!
//! 1. A computed is a subscriber (it reads sources) and a dependency (it is
//!    read by others) at the same time.
//!
//! 2. When a source changes, the computed is marked dirty and the
//!    notification is forwarded to its readers. Nothing is evaluated yet.
//!
//! 3. On the next read, the computed walks its sources. Only if one of them
//!    has a newer version than the one it saw does the getter run.
//!
//! 4. If the getter returns a value equal to the cached one, the computed's
//!    own version stays put and its readers do not re-run.
//!
//! # Why This Matters
//!
//! Chains of computeds only evaluate what is actually read, and an
//! intermediate result that did not change stops the update there.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{DepId, Recompute, SubFlags, SubNode, SubscriberId};

type Getter<T> = Box<dyn Fn(Option<&T>) -> T>;
type Setter<T> = Box<dyn Fn(T)>;

struct ComputedInner<T> {
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: RefCell<Option<T>>,
    sub: SubscriberId,
    dep: DepId,
    runtime: WeakRuntime,
}

impl<T: PartialEq + 'static> Recompute for ComputedInner<T> {
    fn recompute(&self) -> bool {
        let next = {
            let current = self.value.borrow();
            (self.getter)(current.as_ref())
        };
        let mut value = self.value.borrow_mut();
        if value.as_ref() == Some(&next) {
            return false;
        }
        *value = Some(next);
        true
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_subscriber(self.sub);
        }
    }
}

/// A lazily evaluated, cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.signal(2);
/// let doubled = {
///     let count = count.clone();
///     rt.computed(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a read-only computed.
    pub fn new<F>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(runtime, Box::new(move |_| getter()), None)
    }

    /// Create a computed whose getter also receives the previous value.
    pub fn with_previous<F>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn(Option<&T>) -> T + 'static,
    {
        Self::build(runtime, Box::new(getter), None)
    }

    /// Create a writable computed. Writes are forwarded to `setter`.
    pub fn with_setter<G, S>(runtime: &Runtime, getter: G, setter: S) -> Self
    where
        G: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(runtime, Box::new(move |_| getter()), Some(Box::new(setter)))
    }

    fn build(runtime: &Runtime, getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let core: Weak<dyn Recompute> = weak.clone();
            let (sub, dep) = runtime.with_graph(|graph| graph.insert_computed(SubNode::computed(core)));
            ComputedInner {
                getter,
                setter,
                value: RefCell::new(None),
                sub,
                dep,
                runtime: runtime.downgrade(),
            }
        });
        tracing::trace!(sub = ?inner.sub, "computed created");
        Self { inner }
    }

    /// The computed's output dependency.
    pub fn id(&self) -> DepId {
        self.inner.dep
    }

    /// Refresh if needed and borrow the value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            // Detached from its runtime: evaluate plainly every time.
            let value = (self.inner.getter)(self.inner.value.borrow().as_ref());
            return f(&value);
        };

        let link = runtime.track(self.inner.dep);
        runtime.refresh_computed(self.inner.sub);
        if let Some(link) = link {
            runtime.confirm_link(link, self.inner.dep);
        }

        let value = self.inner.value.borrow();
        match value.as_ref() {
            Some(value) => f(value),
            None => {
                // Only reachable when the getter reads its own computed
                // before the first value exists.
                drop(value);
                tracing::warn!(sub = ?self.inner.sub, "computed has no value yet");
                let value = runtime.untracked(|| (self.inner.getter)(None));
                f(&value)
            }
        }
    }

    /// Refresh if needed and borrow the value without tracking the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.untracked(|| self.with(f)),
            None => self.with(f),
        }
    }

    /// Write through the setter. Read-only computeds ignore the write.
    pub fn set(&self, value: T) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => tracing::warn!(sub = ?self.inner.sub, "write operation failed: computed value is readonly"),
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.setter.is_none()
    }

    /// Whether a source changed since the last evaluation. Does not
    /// evaluate.
    pub fn is_dirty(&self) -> bool {
        self.inner.runtime.upgrade().map_or(true, |runtime| {
            runtime.with_graph(|graph| graph.flags(self.inner.sub).contains(SubFlags::DIRTY))
        })
    }

    /// Version of the output dependency. Bumped only when the value changes.
    pub fn version(&self) -> u64 {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dep_version(self.inner.dep))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: PartialEq + Clone + 'static> Computed<T> {
    /// Get the current value, evaluating if needed.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Computed");
        out.field("sub", &self.inner.sub);
        match self.inner.value.try_borrow() {
            Ok(value) => out.field("value", &*value),
            Err(_) => out.field("value", &"<evaluating>"),
        };
        out.finish()
    }
}

impl Runtime {
    /// Create a read-only computed owned by this runtime.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new(self, getter)
    }

    /// Create a writable computed owned by this runtime.
    pub fn computed_with_setter<T, G, S>(&self, getter: G, setter: S) -> Computed<T>
    where
        T: PartialEq + 'static,
        G: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Computed::with_setter(self, getter, setter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::cell::Cell;

    fn counter() -> Rc<Cell<u32>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 2);
        let evaluations = counter();
        let doubled = {
            let (source, evaluations) = (source.clone(), Rc::clone(&evaluations));
            rt.computed(move || {
                evaluations.set(evaluations.get() + 1);
                source.get() * 2
            })
        };

        assert_eq!(evaluations.get(), 0);
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(evaluations.get(), 1);

        source.set(5);
        assert!(doubled.is_dirty());
        assert_eq!(evaluations.get(), 1);
        assert_eq!(doubled.get(), 10);
        assert_eq!(evaluations.get(), 2);
    }

    #[test]
    fn unchanged_result_keeps_version() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 3);
        let parity = {
            let source = source.clone();
            rt.computed(move || source.get() % 2)
        };

        assert_eq!(parity.get(), 1);
        let version = parity.version();
        source.set(5);
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), version);
    }

    #[test]
    fn chained_computed_stops_at_equal_value() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 3);
        let downstream_runs = counter();

        let parity = {
            let source = source.clone();
            rt.computed(move || source.get() % 2)
        };
        let label = {
            let (parity, runs) = (parity.clone(), Rc::clone(&downstream_runs));
            rt.computed(move || {
                runs.set(runs.get() + 1);
                if parity.get() == 0 { "even" } else { "odd" }
            })
        };

        assert_eq!(label.get(), "odd");
        source.set(7);
        assert_eq!(label.get(), "odd");
        assert_eq!(downstream_runs.get(), 1);

        source.set(8);
        assert_eq!(label.get(), "even");
        assert_eq!(downstream_runs.get(), 2);
    }

    #[test]
    fn getter_receives_previous_value() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let history = {
            let source = source.clone();
            Computed::with_previous(&rt, move |previous: Option<&Vec<i32>>| {
                let mut next = previous.cloned().unwrap_or_default();
                next.push(source.get());
                next
            })
        };

        assert_eq!(history.get(), vec![1]);
        source.set(2);
        assert_eq!(history.get(), vec![1, 2]);
    }

    #[test]
    fn writable_computed_forwards_to_setter() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let plus_one = {
            let (read, write) = (source.clone(), source.clone());
            rt.computed_with_setter(move || read.get() + 1, move |value| write.set(value - 1))
        };

        plus_one.set(10);
        assert_eq!(source.get(), 9);
        assert_eq!(plus_one.get(), 10);
    }

    #[test]
    fn readonly_computed_ignores_writes() {
        let rt = Runtime::new();
        let constant = rt.computed(|| 7);
        assert!(constant.is_readonly());
        constant.set(1);
        assert_eq!(constant.get(), 7);
    }

    #[test]
    fn panicking_getter_retries_on_next_read() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 0);
        let checked = {
            let source = source.clone();
            rt.computed(move || {
                let value = source.get();
                assert!(value >= 0, "negative input");
                value
            })
        };
        assert_eq!(checked.get(), 0);

        source.set(-1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| checked.get()));
        assert!(result.is_err());
        assert!(checked.is_dirty());

        source.set(4);
        assert_eq!(checked.get(), 4);
    }

    #[test]
    fn effect_reading_computed_reruns_on_change() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let squared = {
            let source = source.clone();
            rt.computed(move || source.get() * source.get())
        };
        let _effect = {
            let (squared, seen) = (squared.clone(), Rc::clone(&seen));
            rt.effect(move || seen.borrow_mut().push(squared.get()))
        };

        source.set(3);
        source.set(-3);
        assert_eq!(*seen.borrow(), vec![1, 9]);
    }

    #[test]
    fn chained_computed_read_between_batched_writes() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let tens = {
            let source = source.clone();
            rt.computed(move || source.get() * 10)
        };
        let plus_one = {
            let tens = tens.clone();
            rt.computed(move || tens.get() + 1)
        };
        assert_eq!(plus_one.get(), 11);

        let inside = rt.batch(|| {
            source.set(2);
            let first = plus_one.get();
            source.set(3);
            (first, plus_one.get())
        });
        assert_eq!(inside, (21, 31));
        assert_eq!(plus_one.get(), 31);

        source.set(4);
        assert_eq!(plus_one.get(), 41);
    }
}
