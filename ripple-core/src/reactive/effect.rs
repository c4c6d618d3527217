//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately (unless lazy)
//!    to establish initial dependencies.
//!
//! 2. When any dependency changes, the effect is notified. Without a
//!    scheduler it re-runs as soon as the outermost batch closes; with one,
//!    the scheduler decides when (usually by queueing a job).
//!
//! 3. Every run re-collects dependencies. Links that the run did not touch
//!    are pruned afterwards.
//!
//! # Cleanup
//!
//! Cleanups registered with [`Runtime::on_effect_cleanup`] during a run are
//! called before the next run and when the effect is stopped.
//!
//! # Differences from Computed
//!
//! - Computeds return a cached value; effects return whatever their
//!   function returns, every run.
//! - Computeds are lazy; effects are eager.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{Job, SubFlags, SubKind, SubNode, SubscriberId};

/// Options for [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Called instead of re-running the effect when it is notified.
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Hand notifications that arrive mid-run to the scheduler right away.
    /// Without it they wait until the run returns.
    pub allow_recurse: bool,
    /// Skip the initial run.
    pub lazy: bool,
    /// Called once when the effect stops.
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectOptions {
    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.on_stop = Some(Box::new(on_stop));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("scheduler", &self.scheduler.is_some())
            .field("allow_recurse", &self.allow_recurse)
            .field("lazy", &self.lazy)
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Dropping the handle does not stop the effect; call [`Effect::stop`] or
/// stop its scope.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.signal(0);
///
/// let effect = {
///     let count = count.clone();
///     rt.effect(move || println!("Count is: {}", count.get()))
/// };
///
/// count.set(5);  // Prints: "Count is: 5"
/// effect.stop();
/// ```
pub struct Effect<T = ()> {
    id: SubscriberId,
    run: Rc<dyn Fn() -> T>,
    runtime: WeakRuntime,
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            run: Rc::clone(&self.run),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: 'static> Effect<T> {
    /// Create an effect and run it once.
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_options(runtime, f, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(runtime: &Runtime, f: F, options: EffectOptions) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let run: Rc<dyn Fn() -> T> = Rc::new(f);
        let erased: Rc<dyn Fn()> = {
            let run = Rc::clone(&run);
            Rc::new(move || {
                run();
            })
        };

        let EffectOptions {
            scheduler,
            allow_recurse,
            lazy,
            on_stop,
        } = options;
        let mut node = SubNode::effect(erased, scheduler, allow_recurse);
        if let SubKind::Effect { on_stop: slot, .. } = &mut node.kind {
            *slot = on_stop;
        }
        let id = runtime.with_graph(|graph| graph.insert_effect(node));
        tracing::trace!(?id, lazy, "effect created");

        let effect = Self {
            id,
            run,
            runtime: runtime.downgrade(),
        };
        if !lazy {
            effect.run();
        }
        effect
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Run the effect now, re-collecting its dependencies, and return what
    /// the function returned. A stopped effect runs untracked.
    pub fn run(&self) -> T {
        let Some(runtime) = self.runtime.upgrade() else {
            return (self.run)();
        };
        let mut out = None;
        runtime.run_effect(self.id, &mut || out = Some((self.run)()));
        match out {
            Some(value) => value,
            None => (self.run)(),
        }
    }

    /// Run the effect only if a dependency changed since its last run.
    pub fn run_if_dirty(&self) -> Option<T> {
        self.is_dirty().then(|| self.run())
    }

    /// Whether a dependency changed since the last run. Upstream computeds
    /// may be refreshed to find out.
    pub fn is_dirty(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.is_dirty(self.id))
    }

    /// Stop the effect for good: unlink it from every dependency, then run
    /// its cleanups and stop hook. Idempotent.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.stop_effect(self.id);
        }
    }

    /// Hold notifications until [`Effect::resume`].
    pub fn pause(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.pause_effect(self.id);
        }
    }

    /// Resume a paused effect. If it was notified while paused, it is
    /// triggered once now.
    pub fn resume(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.resume_effect(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags().contains(SubFlags::ACTIVE)
    }

    pub fn is_paused(&self) -> bool {
        self.flags().contains(SubFlags::PAUSED)
    }

    /// Number of dependencies the latest run read.
    pub fn dependency_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |runtime| runtime.with_graph(|graph| graph.dependencies_of(self.id).len()))
    }

    fn flags(&self) -> SubFlags {
        self.runtime
            .upgrade()
            .map_or(SubFlags::empty(), |runtime| runtime.with_graph(|graph| graph.flags(self.id)))
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).finish()
    }
}

/// An effect driven by the job queue, the way a component render is.
///
/// Notifications queue the effect's job instead of running it. Jobs are
/// ordered by id, and ids follow creation order, so an effect created
/// before another always updates first within a flush.
pub struct RenderEffect<T = ()> {
    effect: Effect<T>,
    job: Rc<Job>,
}

impl<T> Clone for RenderEffect<T> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
            job: Rc::clone(&self.job),
        }
    }
}

impl<T: 'static> RenderEffect<T> {
    /// Create a render effect and run it once synchronously.
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let job_slot: Rc<OnceCell<Rc<Job>>> = Rc::new(OnceCell::new());

        let scheduler = {
            let job_slot = Rc::clone(&job_slot);
            let runtime = runtime.downgrade();
            move || {
                if let (Some(job), Some(runtime)) = (job_slot.get(), runtime.upgrade()) {
                    runtime.queue_job(Rc::clone(job));
                }
            }
        };
        let on_stop = {
            let job_slot = Rc::clone(&job_slot);
            move || {
                if let Some(job) = job_slot.get() {
                    job.dispose();
                }
            }
        };
        let effect = Effect::with_options(
            runtime,
            f,
            EffectOptions::default()
                .scheduler(scheduler)
                .lazy()
                .on_stop(on_stop),
        );

        let job = {
            let id = effect.id();
            let job_id = runtime.next_job_id();
            let runtime = runtime.downgrade();
            Job::with_id(job_id, move || {
                if let Some(runtime) = runtime.upgrade() {
                    runtime.run_if_dirty(id);
                }
            })
        };
        let _ = job_slot.set(Rc::clone(&job));

        effect.run();
        Self { effect, job }
    }

    /// Position of this effect's job in the queue.
    pub fn job_id(&self) -> Option<u32> {
        self.job.id()
    }

    pub fn job(&self) -> &Rc<Job> {
        &self.job
    }

    pub fn effect(&self) -> &Effect<T> {
        &self.effect
    }

    /// Run synchronously now, regardless of the queue.
    pub fn update(&self) -> T {
        self.effect.run()
    }

    pub fn stop(&self) {
        self.effect.stop();
        self.job.dispose();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

impl Runtime {
    /// Create an effect and run it once.
    pub fn effect<T, F>(&self, f: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Effect::new(self, f)
    }

    /// Create an effect with explicit options.
    pub fn effect_with<T, F>(&self, f: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Effect::with_options(self, f, options)
    }

    /// Create a queue-driven render effect.
    pub fn render_effect<T, F>(&self, f: F) -> RenderEffect<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        RenderEffect::new(self, f)
    }
}
