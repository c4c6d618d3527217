//! Watchers
//!
//! A watcher pairs a tracked source function with a callback. The source
//! runs inside a lazy effect; whenever it is notified, the watcher's job
//! re-evaluates the source and calls the callback with the new and previous
//! values if they differ.
//!
//! When the job runs depends on [`WatchFlush`]: right away, in the pre
//! queue (ahead of render effects), or after the main queue drains.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::effect::{Effect, EffectOptions};
use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{Job, JobFlags};

/// When a watcher's callback runs after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchFlush {
    /// Queued as a pre job, ahead of render effects.
    #[default]
    Pre,
    /// Queued as a post job, after the main queue drains.
    Post,
    /// Inline, as soon as the triggering batch closes.
    Sync,
}

/// Options for [`Runtime::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Call the callback once at creation, with no previous value.
    pub immediate: bool,
    /// Stop after the first callback.
    pub once: bool,
    pub flush: WatchFlush,
}

/// Handle to a watcher.
#[derive(Clone)]
pub struct WatchHandle {
    effect: Effect<()>,
    job: Rc<Job>,
}

impl WatchHandle {
    /// Stop watching. Idempotent.
    pub fn stop(&self) {
        self.effect.stop();
        self.job.dispose();
    }

    pub fn pause(&self) {
        self.effect.pause();
    }

    pub fn resume(&self) {
        self.effect.resume();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.effect.id())
            .field("job", &self.job)
            .finish()
    }
}

struct Watcher<T> {
    source: Box<dyn Fn() -> T>,
    callback: Box<dyn Fn(&T, Option<&T>)>,
    latest: RefCell<Option<T>>,
    previous: RefCell<Option<T>>,
    once: bool,
}

impl Runtime {
    /// Watch `source` and call `callback(new, old)` when its value changes.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let handle = rt.watch(
    ///     move || count.get(),
    ///     |new, old| println!("{old:?} -> {new}"),
    ///     WatchOptions::default(),
    /// );
    /// ```
    pub fn watch<T, S, C>(&self, source: S, callback: C, options: WatchOptions) -> WatchHandle
    where
        T: Clone + PartialEq + 'static,
        S: Fn() -> T + 'static,
        C: Fn(&T, Option<&T>) + 'static,
    {
        let watcher = Rc::new(Watcher {
            source: Box::new(source),
            callback: Box::new(callback),
            latest: RefCell::new(None),
            previous: RefCell::new(None),
            once: options.once,
        });

        // The effect only evaluates the source; the job compares and calls
        // back.
        let job_slot: Rc<RefCell<Option<Rc<Job>>>> = Rc::new(RefCell::new(None));
        let scheduler = {
            let job_slot = Rc::clone(&job_slot);
            let runtime = self.downgrade();
            let flush = options.flush;
            move || {
                let Some(job) = job_slot.borrow().clone() else { return };
                match (flush, runtime.upgrade()) {
                    (WatchFlush::Sync, _) => job.run_now(),
                    (WatchFlush::Pre, Some(runtime)) => runtime.queue_job(job),
                    (WatchFlush::Post, Some(runtime)) => runtime.queue_post_job(job),
                    (_, None) => {}
                }
            }
        };
        let effect = {
            let watcher = Rc::clone(&watcher);
            Effect::with_options(
                self,
                move || {
                    let value = (watcher.source)();
                    *watcher.latest.borrow_mut() = Some(value);
                },
                EffectOptions::default().scheduler(scheduler).lazy(),
            )
        };

        let job = {
            let effect = effect.clone();
            let watcher = Rc::clone(&watcher);
            let runtime = self.downgrade();
            let flags = match options.flush {
                WatchFlush::Pre => JobFlags::PRE,
                WatchFlush::Post | WatchFlush::Sync => JobFlags::default(),
            };
            Job::build(None, flags, move || {
                if effect.is_active() && effect.is_dirty() {
                    fire(&runtime, &effect, &watcher, false);
                }
            })
        };
        *job_slot.borrow_mut() = Some(Rc::clone(&job));

        if options.immediate {
            fire(&self.downgrade(), &effect, &watcher, true);
        } else {
            effect.run();
            let initial = watcher.latest.borrow_mut().take();
            *watcher.previous.borrow_mut() = initial;
        }
        tracing::trace!(effect = ?effect.id(), flush = ?options.flush, "watcher created");

        WatchHandle { effect, job }
    }
}

/// Re-evaluate the source and call back if the value changed (or if this
/// is the immediate first call).
fn fire<T: Clone + PartialEq + 'static>(
    runtime: &WeakRuntime,
    effect: &Effect<()>,
    watcher: &Watcher<T>,
    initial: bool,
) {
    effect.run();
    let Some(next) = watcher.latest.borrow_mut().take() else { return };
    let changed = watcher.previous.borrow().as_ref() != Some(&next);
    if !changed && !initial {
        return;
    }

    let previous = watcher.previous.borrow_mut().replace(next.clone());
    // The callback's own reads must not subscribe the watcher.
    match runtime.upgrade() {
        Some(runtime) => runtime.untracked(|| (watcher.callback)(&next, previous.as_ref())),
        None => (watcher.callback)(&next, previous.as_ref()),
    }

    if watcher.once {
        effect.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;

    type Log = Rc<RefCell<Vec<(i32, Option<i32>)>>>;

    fn watch_signal(rt: &Runtime, source: &Signal<i32>, options: WatchOptions) -> (WatchHandle, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let handle = {
            let (source, log) = (source.clone(), Rc::clone(&log));
            rt.watch(
                move || source.get(),
                move |new, old| log.borrow_mut().push((*new, old.copied())),
                options,
            )
        };
        (handle, log)
    }

    #[test]
    fn pre_watcher_waits_for_flush() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let (_handle, log) = watch_signal(&rt, &source, WatchOptions::default());

        source.set(2);
        assert!(log.borrow().is_empty());
        rt.flush().unwrap();
        assert_eq!(*log.borrow(), vec![(2, Some(1))]);
    }

    #[test]
    fn sync_watcher_fires_inline() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 1);
        let options = WatchOptions {
            flush: WatchFlush::Sync,
            ..WatchOptions::default()
        };
        let (_handle, log) = watch_signal(&rt, &source, options);

        source.set(2);
        source.set(3);
        assert_eq!(*log.borrow(), vec![(2, Some(1)), (3, Some(2))]);
    }

    #[test]
    fn immediate_watcher_has_no_previous_value() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 7);
        let options = WatchOptions {
            immediate: true,
            flush: WatchFlush::Sync,
            ..WatchOptions::default()
        };
        let (_handle, log) = watch_signal(&rt, &source, options);
        assert_eq!(*log.borrow(), vec![(7, None)]);
    }

    #[test]
    fn equal_values_do_not_call_back() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 4);
        let parity = {
            let source = source.clone();
            rt.computed(move || source.get() % 2)
        };
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let _handle = {
            let log = Rc::clone(&log);
            rt.watch(
                move || parity.get(),
                move |new, old| log.borrow_mut().push((*new, old.copied())),
                WatchOptions {
                    flush: WatchFlush::Sync,
                    ..WatchOptions::default()
                },
            )
        };

        source.set(6);
        assert!(log.borrow().is_empty());
        source.set(7);
        assert_eq!(*log.borrow(), vec![(1, Some(0))]);
    }

    #[test]
    fn once_watcher_stops_after_first_callback() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 0);
        let options = WatchOptions {
            once: true,
            flush: WatchFlush::Sync,
            ..WatchOptions::default()
        };
        let (handle, log) = watch_signal(&rt, &source, options);

        source.set(1);
        source.set(2);
        assert_eq!(*log.borrow(), vec![(1, Some(0))]);
        assert!(!handle.is_active());
    }

    #[test]
    fn post_watcher_runs_after_render_effects() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let _render = {
            let (source, order) = (source.clone(), Rc::clone(&order));
            rt.render_effect(move || {
                source.get();
                order.borrow_mut().push("render");
            })
        };
        let _post = {
            let (source, order) = (source.clone(), Rc::clone(&order));
            rt.watch(
                move || source.get(),
                move |_, _| order.borrow_mut().push("post"),
                WatchOptions {
                    flush: WatchFlush::Post,
                    ..WatchOptions::default()
                },
            )
        };
        let _pre = {
            let (source, order) = (source.clone(), Rc::clone(&order));
            rt.watch(
                move || source.get(),
                move |_, _| order.borrow_mut().push("pre"),
                WatchOptions::default(),
            )
        };
        order.borrow_mut().clear();

        source.set(1);
        rt.flush().unwrap();
        assert_eq!(*order.borrow(), vec!["pre", "render", "post"]);
    }

    #[test]
    fn stopped_watcher_is_silent() {
        let rt = Runtime::new();
        let source = Signal::new(&rt, 0);
        let (handle, log) = watch_signal(&rt, &source, WatchOptions::default());

        source.set(1);
        handle.stop();
        rt.flush().unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(source.subscriber_count(), 0);
    }
}
