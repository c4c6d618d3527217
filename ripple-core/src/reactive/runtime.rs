//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds,
//! effects and scopes. It owns the dependency graph and the job scheduler,
//! and it is the only place that calls user code on behalf of the graph.
//!
//! # How It Works
//!
//! 1. A read inside a running effect or computed links the dependency to
//!    that subscriber (see [`Graph::track`]).
//!
//! 2. A write bumps the dependency's version and, inside a batch:
//!    a. Marks dependent computeds dirty and forwards to their readers
//!    b. Collects dependent effects
//!
//! 3. When the outermost batch closes, every collected effect is triggered:
//!    effects with a scheduler hand themselves to it, the rest re-run now if
//!    one of their dependencies really changed.
//!
//! 4. Computeds are lazy. A read refreshes the computed only if something
//!    upstream changed since its last evaluation.
//!
//! # Ownership
//!
//! Handles (`Signal`, `Computed`, ...) keep a [`WeakRuntime`], so the
//! runtime is freed as soon as the last `Runtime` clone goes away. Graph
//! records are released when their handle drops; a release that arrives
//! while the graph is borrowed is queued and applied on the next access.
//!
//! # Threading
//!
//! The runtime is single-threaded (`!Send`). Run one per thread, or one per
//! tokio `LocalSet` when using [`FlushMode::Tokio`].

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde::Serialize;

use super::context::{DetachedContext, ReactiveContext, ScopeContext, UntrackedContext};
use crate::config::{FlushMode, RuntimeConfig};
use crate::error::{panic_message, FlushError, ReactiveError};
use crate::graph::{
    DepId, FlushReport, Graph, Job, LinkId, Scheduler, ScopeId, SubFlags, SubKind, SubscriberId,
};

type PanicPayload = Box<dyn Any + Send>;

/// A graph record whose handle was dropped.
enum Release {
    Dep(DepId),
    Subscriber(SubscriberId),
}

struct RuntimeInner {
    graph: RefCell<Graph>,
    pending_release: RefCell<Vec<Release>>,
    scheduler: Scheduler,
    /// Reactive container per raw storage pointer.
    proxies: RefCell<HashMap<usize, Weak<dyn Any>>>,
    config: RuntimeConfig,
    next_job_id: Cell<u32>,
}

/// Handle to a reactive runtime. Cloning is cheap and shares the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning handle held by reactive primitives.
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// The runtime, if it is still alive.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Point-in-time counters for a runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub dependencies: usize,
    pub links: usize,
    pub subscribers: usize,
    pub scopes: usize,
    pub queued_jobs: usize,
    pub global_version: u64,
}

enum Refresh {
    Fresh,
    Check,
    Evaluate,
}

enum Trigger {
    Skip,
    Schedule(Rc<dyn Fn()>),
    RunIfDirty,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with an explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        tracing::debug!(?config, "creating reactive runtime");
        let flush = config.flush;
        let runtime = Self {
            inner: Rc::new(RuntimeInner {
                graph: RefCell::new(Graph::new()),
                pending_release: RefCell::new(Vec::new()),
                scheduler: Scheduler::new(config.recursion_limit),
                proxies: RefCell::new(HashMap::new()),
                config,
                next_job_id: Cell::new(0),
            }),
        };
        if flush == FlushMode::Tokio {
            runtime.install_tokio_host();
        }
        runtime
    }

    /// Spawn one local task per requested flush.
    ///
    /// Must be used from within a `tokio::task::LocalSet`.
    fn install_tokio_host(&self) {
        let weak = self.downgrade();
        self.inner.scheduler.set_host(move || {
            let weak = weak.clone();
            tokio::task::spawn_local(async move {
                let Some(runtime) = weak.upgrade() else { return };
                if let Err(err) = runtime.flush() {
                    tracing::error!(%err, "scheduled flush failed");
                }
            });
        });
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Graph access
    // ------------------------------------------------------------------

    /// Run `f` against the graph. Queued releases are applied first, and
    /// closures the graph let go of are dropped after the borrow ends.
    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let (result, garbage) = {
            let mut graph = self.inner.graph.borrow_mut();
            self.apply_pending(&mut graph);
            let result = f(&mut graph);
            (result, graph.take_garbage())
        };
        drop(garbage);
        result
    }

    fn apply_pending(&self, graph: &mut Graph) {
        let pending = std::mem::take(&mut *self.inner.pending_release.borrow_mut());
        for release in pending {
            match release {
                Release::Dep(dep) => graph.remove_dep(dep),
                Release::Subscriber(sub) => graph.remove_subscriber(sub),
            }
        }
    }

    fn release(&self, release: Release) {
        match self.inner.graph.try_borrow_mut() {
            Ok(mut graph) => {
                self.inner.pending_release.borrow_mut().push(release);
                self.apply_pending(&mut graph);
                let garbage = graph.take_garbage();
                drop(graph);
                drop(garbage);
            }
            Err(_) => self.inner.pending_release.borrow_mut().push(release),
        }
    }

    pub(crate) fn create_dep(&self) -> DepId {
        self.with_graph(Graph::create_dep)
    }

    /// Forget a dependency whose owner was dropped.
    pub(crate) fn release_dep(&self, dep: DepId) {
        self.release(Release::Dep(dep));
    }

    /// Forget a computed whose handle was dropped.
    pub(crate) fn release_subscriber(&self, sub: SubscriberId) {
        self.release(Release::Subscriber(sub));
    }

    pub(crate) fn dep_version(&self, dep: DepId) -> u64 {
        self.with_graph(|graph| graph.dep_version(dep).unwrap_or(0))
    }

    pub(crate) fn subscriber_count(&self, dep: DepId) -> usize {
        self.with_graph(|graph| graph.deps.get(dep).map_or(0, |node| node.sub_count))
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Whether a read right now would be recorded.
    pub fn is_tracking(&self) -> bool {
        self.with_graph(|graph| graph.is_tracking())
    }

    /// The subscriber currently collecting dependencies.
    pub fn active_subscriber(&self) -> Option<SubscriberId> {
        self.with_graph(|graph| graph.active_sub)
    }

    pub(crate) fn track(&self, dep: DepId) -> Option<LinkId> {
        self.with_graph(|graph| graph.track(dep))
    }

    /// Stamp a link with its dependency's current version.
    pub(crate) fn confirm_link(&self, link: LinkId, dep: DepId) {
        self.with_graph(|graph| {
            if let Some(version) = graph.dep_version(dep) {
                graph.confirm_link(link, version);
            }
        });
    }

    /// Run `f` without recording any reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = UntrackedContext::enter(self);
        f()
    }

    pub fn pause_tracking(&self) {
        self.with_graph(Graph::pause_tracking);
    }

    pub fn enable_tracking(&self) {
        self.with_graph(Graph::enable_tracking);
    }

    pub fn reset_tracking(&self) {
        self.with_graph(Graph::reset_tracking);
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Record a change to `dep` and notify everything downstream.
    pub(crate) fn trigger(&self, dep: DepId) {
        let known = self.with_graph(|graph| {
            if !graph.bump_version(dep) {
                return false;
            }
            graph.start_batch();
            graph.collect_notifications(dep);
            true
        });
        if known {
            tracing::trace!(?dep, "dependency triggered");
            self.end_batch();
        }
    }

    /// Run `f` as one batch: effects notified by its writes run once, when
    /// the outermost batch closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.with_graph(Graph::start_batch);
        let outcome = catch_unwind(AssertUnwindSafe(f));
        let effect_panic = self.close_batch();
        match outcome {
            Ok(value) => {
                if let Some(payload) = effect_panic {
                    resume_unwind(payload);
                }
                value
            }
            Err(payload) => resume_unwind(payload),
        }
    }

    fn end_batch(&self) {
        if let Some(payload) = self.close_batch() {
            resume_unwind(payload);
        }
    }

    /// Close one batch level. On the outermost level, trigger every batched
    /// effect and return the first panic raised by any of them.
    fn close_batch(&self) -> Option<PanicPayload> {
        if !self.with_graph(Graph::end_batch) {
            return None;
        }
        let mut first_panic = None;
        loop {
            let batch = self.with_graph(Graph::take_batched_effects);
            if batch.is_empty() {
                break;
            }
            for sub in batch {
                let active = self.with_graph(|graph| {
                    graph.clear_flag(sub, SubFlags::NOTIFIED);
                    graph.flags(sub).contains(SubFlags::ACTIVE)
                });
                if !active {
                    continue;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.trigger_effect(sub))) {
                    tracing::error!(?sub, message = %panic_message(payload.as_ref()), "effect panicked");
                    first_panic.get_or_insert(payload);
                }
            }
        }
        first_panic
    }

    /// React to a notification of `sub`.
    pub(crate) fn trigger_effect(&self, sub: SubscriberId) {
        let action = self.with_graph(|graph| {
            let Some(node) = graph.subs.get_mut(sub) else { return Trigger::Skip };
            if node.flags.contains(SubFlags::PAUSED) {
                graph.paused_notified.insert(sub);
                return Trigger::Skip;
            }
            // A running effect re-runs once its current run returns.
            let running = node.flags.contains(SubFlags::RUNNING);
            if running && !node.flags.contains(SubFlags::ALLOW_RECURSE) {
                node.flags.insert(SubFlags::RERUN);
                return Trigger::Skip;
            }
            if let SubKind::Effect {
                scheduler: Some(scheduler),
                ..
            } = &node.kind
            {
                return Trigger::Schedule(Rc::clone(scheduler));
            }
            if running {
                node.flags.insert(SubFlags::RERUN);
                return Trigger::Skip;
            }
            Trigger::RunIfDirty
        });

        match action {
            Trigger::Skip => {}
            Trigger::Schedule(scheduler) => scheduler(),
            Trigger::RunIfDirty => self.run_if_dirty(sub),
        }
    }

    /// Whether any dependency of `sub` changed since it last observed it.
    /// Upstream computeds are refreshed along the way.
    pub(crate) fn is_dirty(&self, sub: SubscriberId) -> bool {
        let links = self.with_graph(|graph| graph.links_of(sub));
        for (_, dep, observed) in links {
            let Some((version, owner)) =
                self.with_graph(|graph| graph.deps.get(dep).map(|node| (node.version, node.owner)))
            else {
                return true;
            };
            if observed != Some(version) {
                return true;
            }
            if let Some(owner) = owner {
                self.refresh_computed(owner);
                if self.with_graph(|graph| graph.dep_version(dep)) != observed {
                    return true;
                }
            }
        }
        false
    }

    /// Bring a computed's cached value up to date if it might be stale.
    pub(crate) fn refresh_computed(&self, computed: SubscriberId) {
        let step = self.with_graph(|graph| {
            let global = graph.global_version;
            let Some(node) = graph.subs.get_mut(computed) else { return Refresh::Fresh };
            if node.flags.contains(SubFlags::RUNNING) {
                tracing::warn!(?computed, "computed read itself while evaluating");
                return Refresh::Fresh;
            }
            if !node.flags.contains(SubFlags::DIRTY) {
                return Refresh::Fresh;
            }
            // Clean again, so the next upstream change must reach us.
            node.flags.remove(SubFlags::DIRTY | SubFlags::NOTIFIED);

            // Nothing anywhere changed since the last refresh.
            if let SubKind::Computed { global_version, .. } = &mut node.kind {
                if *global_version == Some(global) {
                    return Refresh::Fresh;
                }
                *global_version = Some(global);
            }

            match (
                node.flags.contains(SubFlags::EVALUATED),
                node.deps_head.is_some(),
            ) {
                (false, _) => Refresh::Evaluate,
                (true, false) => Refresh::Fresh,
                (true, true) => Refresh::Check,
            }
        });

        match step {
            Refresh::Fresh => return,
            Refresh::Check if !self.is_dirty(computed) => return,
            Refresh::Check | Refresh::Evaluate => {}
        }
        self.evaluate_computed(computed);
    }

    fn evaluate_computed(&self, computed: SubscriberId) {
        let target = self.with_graph(|graph| match graph.subs.get(computed).map(|node| &node.kind) {
            Some(SubKind::Computed { core, dep, .. }) => Some((core.clone(), *dep)),
            _ => None,
        });
        let Some((core, dep)) = target else { return };
        let Some(core) = core.upgrade() else { return };

        let changed = {
            let _context = ReactiveContext::enter(self, computed);
            core.recompute()
        };

        self.with_graph(|graph| {
            graph.set_flag(computed, SubFlags::EVALUATED);
            if changed {
                if let Some(node) = graph.deps.get_mut(dep) {
                    node.version += 1;
                }
            }
        });
        tracing::trace!(?computed, changed, "computed evaluated");
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Run an effect's function as a tracked run of `sub`.
    ///
    /// An effect notified during its own run (allowed only with
    /// `allow_recurse`) runs again right after, up to the recursion limit.
    pub(crate) fn run_effect(&self, sub: SubscriberId, f: &mut dyn FnMut()) {
        self.run_effect_once(sub, f);

        let limit = self.inner.config.recursion_limit;
        let mut reruns = 0;
        while self.take_rerun(sub) {
            reruns += 1;
            if reruns > limit {
                tracing::warn!(?sub, limit, "effect exceeded recursive update limit");
                break;
            }
            if self.is_dirty(sub) {
                self.run_effect_once(sub, f);
            }
        }
    }

    fn take_rerun(&self, sub: SubscriberId) -> bool {
        self.with_graph(|graph| {
            let flags = graph.flags(sub);
            if !flags.contains(SubFlags::RERUN) {
                return false;
            }
            graph.clear_flag(sub, SubFlags::RERUN);
            flags.contains(SubFlags::ACTIVE)
        })
    }

    fn run_effect_once(&self, sub: SubscriberId, f: &mut dyn FnMut()) {
        let cleanups = self.with_graph(|graph| {
            let node = graph.subs.get_mut(sub)?;
            if !node.flags.contains(SubFlags::ACTIVE) {
                return None;
            }
            match &mut node.kind {
                SubKind::Effect { cleanups, .. } => Some(std::mem::take(cleanups)),
                SubKind::Computed { .. } => None,
            }
        });

        // Stopped effects still run, just without tracking.
        let Some(cleanups) = cleanups else {
            f();
            return;
        };

        let _context = ReactiveContext::enter(self, sub);
        if !cleanups.is_empty() {
            let _detached = DetachedContext::enter(self);
            for cleanup in cleanups {
                cleanup();
            }
        }
        f();
    }

    /// Re-run an effect through its stored function if it is dirty.
    pub(crate) fn run_if_dirty(&self, sub: SubscriberId) {
        if !self.is_dirty(sub) {
            return;
        }
        let run = self.with_graph(|graph| match graph.subs.get(sub).map(|node| &node.kind) {
            Some(SubKind::Effect { run, .. }) => Some(Rc::clone(run)),
            _ => None,
        });
        if let Some(run) = run {
            self.run_effect(sub, &mut || run());
        }
    }

    /// Stop an effect: unlink it, then run its cleanups and stop hook.
    pub(crate) fn stop_effect(&self, sub: SubscriberId) {
        let stopped = self.with_graph(|graph| {
            let node = graph.subs.get_mut(sub)?;
            if !node.flags.contains(SubFlags::ACTIVE) {
                return None;
            }
            node.flags.remove(SubFlags::ACTIVE);
            let running = node.flags.contains(SubFlags::RUNNING);
            let scope = node.scope.take();
            let hooks = match &mut node.kind {
                SubKind::Effect {
                    cleanups, on_stop, ..
                } => (std::mem::take(cleanups), on_stop.take()),
                SubKind::Computed { .. } => (Vec::new(), None),
            };

            if let Some(scope) = scope.and_then(|scope| graph.scopes.get_mut(scope)) {
                scope.effects.retain(|effect| *effect != sub);
            }
            if running {
                // The run's context removes the node once it unwinds.
                graph.unlink_all(sub);
                graph.paused_notified.shift_remove(&sub);
            } else {
                graph.remove_subscriber(sub);
            }
            Some(hooks)
        });
        let Some((cleanups, on_stop)) = stopped else { return };
        tracing::debug!(?sub, "effect stopped");

        let _detached = DetachedContext::enter(self);
        for cleanup in cleanups {
            cleanup();
        }
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    pub(crate) fn pause_effect(&self, sub: SubscriberId) {
        self.with_graph(|graph| graph.set_flag(sub, SubFlags::PAUSED));
    }

    /// Resume an effect. If it was notified while paused it is triggered
    /// once now.
    pub(crate) fn resume_effect(&self, sub: SubscriberId) {
        let notified = self.with_graph(|graph| {
            if !graph.flags(sub).contains(SubFlags::PAUSED) {
                return false;
            }
            graph.clear_flag(sub, SubFlags::PAUSED);
            graph.paused_notified.shift_remove(&sub)
        });
        if notified {
            self.trigger_effect(sub);
        }
    }

    /// Register a cleanup on the running effect. It runs before the next
    /// run, or when the effect stops. Returns `false` (and drops `f`) when
    /// no effect is running.
    pub fn on_effect_cleanup<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        let rejected = self.with_graph(move |graph| {
            let mut cleanup: Option<Box<dyn FnOnce()>> = Some(Box::new(f));
            let target = graph.active_sub.and_then(|sub| graph.subs.get_mut(sub));
            if let Some(SubKind::Effect { cleanups, .. }) = target.map(|node| &mut node.kind) {
                cleanups.extend(cleanup.take());
            }
            cleanup
        });
        match rejected {
            None => true,
            Some(cleanup) => {
                tracing::warn!("on_effect_cleanup called without an active effect");
                drop(cleanup);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    pub(crate) fn create_scope(&self, detached: bool) -> ScopeId {
        self.with_graph(|graph| graph.create_scope(detached))
    }

    pub(crate) fn current_scope_id(&self) -> Option<ScopeId> {
        self.with_graph(|graph| {
            graph
                .active_scope
                .filter(|scope| graph.scopes.get(*scope).is_some_and(|node| node.active))
        })
    }

    pub(crate) fn scope_is_active(&self, scope: ScopeId) -> bool {
        self.with_graph(|graph| graph.scopes.get(scope).is_some_and(|node| node.active))
    }

    /// Run `f` with `scope` as the active scope.
    pub(crate) fn run_in_scope<R>(
        &self,
        scope: ScopeId,
        f: impl FnOnce() -> R,
    ) -> Result<R, ReactiveError> {
        if !self.scope_is_active(scope) {
            tracing::warn!(?scope, "cannot run an inactive effect scope");
            return Err(ReactiveError::ScopeStopped);
        }
        let _context = ScopeContext::enter(self, scope);
        Ok(f())
    }

    /// Add a cleanup to a live scope. Returns `false` (and drops `f`) if
    /// the scope is gone or stopped.
    pub(crate) fn add_scope_cleanup(&self, scope: ScopeId, f: Box<dyn FnOnce()>) -> bool {
        let rejected = self.with_graph(move |graph| match graph.scopes.get_mut(scope) {
            Some(node) if node.active => {
                node.cleanups.push(f);
                None
            }
            _ => Some(f),
        });
        rejected.is_none()
    }

    /// Register a cleanup on the active scope.
    pub fn on_scope_dispose<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        match self.current_scope_id() {
            Some(scope) => self.add_scope_cleanup(scope, Box::new(f)),
            None => {
                tracing::warn!("on_scope_dispose called without an active effect scope");
                false
            }
        }
    }

    /// Stop a scope: its children, then its effects, then its cleanups in
    /// registration order. A scope stopped directly (not through its
    /// parent) also leaves its parent's child list.
    pub(crate) fn stop_scope(&self, scope: ScopeId, from_parent: bool) {
        let taken = self.with_graph(|graph| {
            let node = graph.scopes.get_mut(scope)?;
            if !node.active {
                return None;
            }
            node.active = false;
            Some((
                std::mem::take(&mut node.children),
                std::mem::take(&mut node.effects),
                std::mem::take(&mut node.cleanups),
            ))
        });
        let Some((children, effects, cleanups)) = taken else { return };
        tracing::debug!(?scope, children = children.len(), effects = effects.len(), "stopping scope");

        let mut first_panic: Option<PanicPayload> = None;
        let mut isolate = |step: &mut dyn FnMut()| {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(step)) {
                first_panic.get_or_insert(payload);
            }
        };
        for child in children {
            isolate(&mut || self.stop_scope(child, true));
        }
        for effect in effects {
            isolate(&mut || self.stop_effect(effect));
        }
        for cleanup in cleanups {
            let mut cleanup = Some(cleanup);
            isolate(&mut || {
                if let Some(cleanup) = cleanup.take() {
                    cleanup();
                }
            });
        }

        self.with_graph(|graph| {
            if !from_parent {
                graph.detach_scope(scope);
            }
            if let Some(node) = graph.scopes.remove(scope) {
                graph.discard(Box::new(node));
            }
        });

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    pub(crate) fn pause_scope(&self, scope: ScopeId) {
        let targets = self.with_graph(|graph| {
            let node = graph.scopes.get_mut(scope)?;
            if !node.active {
                return None;
            }
            node.paused = true;
            Some((node.children.clone(), node.effects.clone()))
        });
        let Some((children, effects)) = targets else { return };
        for child in children {
            self.pause_scope(child);
        }
        for effect in effects {
            self.pause_effect(effect);
        }
    }

    pub(crate) fn resume_scope(&self, scope: ScopeId) {
        let targets = self.with_graph(|graph| {
            let node = graph.scopes.get_mut(scope)?;
            if !node.active || !node.paused {
                return None;
            }
            node.paused = false;
            Some((node.children.clone(), node.effects.clone()))
        });
        let Some((children, effects)) = targets else { return };
        for child in children {
            self.resume_scope(child);
        }
        for effect in effects {
            self.resume_effect(effect);
        }
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Allocate a job id. Ids grow with creation order.
    pub fn next_job_id(&self) -> u32 {
        let id = self.inner.next_job_id.get();
        self.inner.next_job_id.set(id.wrapping_add(1));
        id
    }

    pub fn queue_job(&self, job: Rc<Job>) {
        self.inner.scheduler.queue_job(job);
    }

    pub fn queue_post_job(&self, job: Rc<Job>) {
        self.inner.scheduler.queue_post_job(job);
    }

    /// Drain the job queues now.
    pub fn flush(&self) -> Result<FlushReport, FlushError> {
        self.inner.scheduler.flush()
    }

    /// Run queued pre jobs synchronously, optionally only those of `owner`.
    pub fn flush_pre_jobs(&self, owner: Option<u32>) -> Result<usize, FlushError> {
        self.inner.scheduler.flush_pre_jobs(owner)
    }

    pub fn flush_post_jobs(&self) -> Result<usize, FlushError> {
        self.inner.scheduler.flush_post_jobs()
    }

    /// Resolve once the pending flush, if any, has completed.
    pub async fn next_tick(&self) {
        self.inner.scheduler.next_tick().await;
    }

    // ------------------------------------------------------------------
    // Container cache
    // ------------------------------------------------------------------

    pub(crate) fn cached_proxy<P: Any>(&self, key: usize) -> Option<Rc<P>> {
        let entry = self.inner.proxies.borrow().get(&key)?.upgrade()?;
        entry.downcast::<P>().ok()
    }

    pub(crate) fn register_proxy<P: Any>(&self, key: usize, proxy: &Rc<P>) {
        let weak: Weak<P> = Rc::downgrade(proxy);
        let weak: Weak<dyn Any> = weak;
        self.inner.proxies.borrow_mut().insert(key, weak);
    }

    pub(crate) fn forget_proxy(&self, key: usize) {
        if let Ok(mut proxies) = self.inner.proxies.try_borrow_mut() {
            if proxies.get(&key).is_some_and(|entry| entry.strong_count() == 0) {
                proxies.remove(&key);
            }
        }
    }

    /// Current graph and queue sizes.
    pub fn stats(&self) -> GraphStats {
        let queued_jobs = self.inner.scheduler.queued();
        self.with_graph(|graph| GraphStats {
            dependencies: graph.dep_count(),
            links: graph.link_count(),
            subscribers: graph.subscriber_count(),
            scopes: graph.scope_count(),
            queued_jobs,
            global_version: graph.global_version,
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.graph.try_borrow() {
            Ok(graph) => f
                .debug_struct("Runtime")
                .field("dependencies", &graph.dep_count())
                .field("subscribers", &graph.subscriber_count())
                .field("global_version", &graph.global_version)
                .finish(),
            Err(_) => f.debug_struct("Runtime").finish_non_exhaustive(),
        }
    }
}
