//! Reactive Context
//!
//! The reactive context records which computation is currently running so
//! that reads can register it as a dependent, and which scope new effects
//! attach to.
//!
//! # Implementation
//!
//! Both slots live in the runtime's graph rather than in a global. Entering
//! a context swaps the new value in and keeps the previous one in a guard;
//! dropping the guard swaps it back. Because the restore happens in `Drop`,
//! the graph stays consistent even when the computation panics.
//!
//! This design supports nested contexts (e.g. a computed read from inside an
//! effect): each guard restores exactly what it replaced.

use super::runtime::Runtime;
use crate::graph::{ScopeId, SubFlags, SubKind, SubscriberId};

/// Guard for one tracked run of a subscriber.
///
/// Entering marks the subscriber running, stamps its links unconfirmed and
/// makes it the active subscriber. Dropping the guard prunes the links the
/// run did not re-confirm and restores the previous context.
pub(crate) struct ReactiveContext<'a> {
    runtime: &'a Runtime,
    subscriber: SubscriberId,
    previous: Option<SubscriberId>,
    previous_should_track: bool,
}

impl<'a> ReactiveContext<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, subscriber: SubscriberId) -> Self {
        let (previous, previous_should_track) = runtime.with_graph(|graph| {
            graph.set_flag(subscriber, SubFlags::RUNNING);
            graph.prepare_deps(subscriber);
            let previous = graph.active_sub.replace(subscriber);
            let previous_should_track = std::mem::replace(&mut graph.should_track, true);
            (previous, previous_should_track)
        });

        Self {
            runtime,
            subscriber,
            previous,
            previous_should_track,
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        let unwinding = std::thread::panicking();
        let subscriber = self.subscriber;
        let previous = self.previous;
        let previous_should_track = self.previous_should_track;

        self.runtime.with_graph(|graph| {
            debug_assert_eq!(
                graph.active_sub,
                Some(subscriber),
                "active subscriber was not restored correctly"
            );
            graph.active_sub = previous;
            graph.should_track = previous_should_track;
            graph.cleanup_deps(subscriber);
            graph.clear_flag(subscriber, SubFlags::RUNNING);

            let Some(node) = graph.subs.get_mut(subscriber) else { return };
            let stopped = !node.flags.contains(SubFlags::ACTIVE);
            match &mut node.kind {
                SubKind::Computed {
                    dep, global_version, ..
                } if unwinding => {
                    // Make the next read retry, and make readers re-check.
                    let dep = *dep;
                    *global_version = None;
                    node.flags.insert(SubFlags::DIRTY);
                    node.flags.remove(SubFlags::EVALUATED);
                    if let Some(dep) = graph.deps.get_mut(dep) {
                        dep.version += 1;
                    }
                }
                SubKind::Effect { .. } if stopped => {
                    // Stopped from inside its own run.
                    graph.remove_subscriber(subscriber);
                }
                _ => {}
            }
        });
    }
}

/// Guard that installs a scope as the active scope.
pub(crate) struct ScopeContext<'a> {
    runtime: &'a Runtime,
    previous: Option<ScopeId>,
}

impl<'a> ScopeContext<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, scope: ScopeId) -> Self {
        let previous = runtime.with_graph(|graph| graph.active_scope.replace(scope));
        Self { runtime, previous }
    }
}

impl Drop for ScopeContext<'_> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.runtime
            .with_graph(|graph| graph.active_scope = previous);
    }
}

/// Guard that clears the active subscriber, so reads inside it are not
/// attributed to anyone.
pub(crate) struct DetachedContext<'a> {
    runtime: &'a Runtime,
    previous: Option<SubscriberId>,
}

impl<'a> DetachedContext<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        let previous = runtime.with_graph(|graph| graph.active_sub.take());
        Self { runtime, previous }
    }
}

impl Drop for DetachedContext<'_> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.runtime.with_graph(|graph| graph.active_sub = previous);
    }
}

/// Guard for `pause_tracking` / `reset_tracking`.
pub(crate) struct UntrackedContext<'a> {
    runtime: &'a Runtime,
}

impl<'a> UntrackedContext<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.with_graph(|graph| graph.pause_tracking());
        Self { runtime }
    }
}

impl Drop for UntrackedContext<'_> {
    fn drop(&mut self) {
        self.runtime.with_graph(|graph| graph.reset_tracking());
    }
}
