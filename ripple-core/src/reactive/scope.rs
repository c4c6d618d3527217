//! Effect Scopes
//!
//! A scope collects the effects (and child scopes) created while it is
//! active, so that they can be paused, resumed and stopped together.
//!
//! Stopping a scope stops its children first, then its own effects, then
//! runs its dispose callbacks in registration order. A stopped scope cannot
//! be run again.

use std::fmt;

use super::runtime::{Runtime, WeakRuntime};
use crate::error::ReactiveError;
use crate::graph::ScopeId;

/// A group of effects with a shared lifetime.
///
/// # Example
///
/// ```rust,ignore
/// let scope = rt.effect_scope();
/// scope.run(|| {
///     rt.effect(move || println!("{}", count.get()));
/// })?;
///
/// scope.stop(); // the effect is stopped too
/// ```
#[derive(Clone)]
pub struct EffectScope {
    id: ScopeId,
    runtime: WeakRuntime,
}

impl EffectScope {
    /// Create a scope nested in the active scope, if any.
    pub fn new(runtime: &Runtime) -> Self {
        Self::create(runtime, false)
    }

    /// Create a scope that is never collected by a parent.
    pub fn detached(runtime: &Runtime) -> Self {
        Self::create(runtime, true)
    }

    fn create(runtime: &Runtime, detached: bool) -> Self {
        let id = runtime.create_scope(detached);
        tracing::trace!(?id, detached, "effect scope created");
        Self {
            id,
            runtime: runtime.downgrade(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Run `f` with this scope active, so effects and scopes it creates
    /// are collected here.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let runtime = self.runtime.upgrade().ok_or(ReactiveError::ScopeStopped)?;
        runtime.run_in_scope(self.id, f)
    }

    /// Register a callback to run when this scope stops. Returns `false`
    /// if the scope is already stopped.
    pub fn on_dispose<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.add_scope_cleanup(self.id, Box::new(f)))
    }

    /// Stop everything collected by the scope. Idempotent.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.stop_scope(self.id, false);
        }
    }

    pub fn pause(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.pause_scope(self.id);
        }
    }

    pub fn resume(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.resume_scope(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.scope_is_active(self.id))
    }

    pub fn is_paused(&self) -> bool {
        self.inspect(|node| node.paused).unwrap_or(false)
    }

    /// Number of live effects collected by this scope.
    pub fn effect_count(&self) -> usize {
        self.inspect(|node| node.effects.len()).unwrap_or(0)
    }

    /// Number of child scopes.
    pub fn child_count(&self) -> usize {
        self.inspect(|node| node.children.len()).unwrap_or(0)
    }

    fn inspect<R>(&self, f: impl FnOnce(&crate::graph::ScopeNode) -> R) -> Option<R> {
        let runtime = self.runtime.upgrade()?;
        runtime.with_graph(|graph| graph.scopes.get(self.id).map(f))
    }
}

impl PartialEq for EffectScope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Runtime {
    /// Create a scope nested in the active scope, if any.
    pub fn effect_scope(&self) -> EffectScope {
        EffectScope::new(self)
    }

    /// Create a scope that is never collected by a parent.
    pub fn detached_scope(&self) -> EffectScope {
        EffectScope::detached(self)
    }

    /// The scope effects are currently collected into.
    pub fn current_scope(&self) -> Option<EffectScope> {
        self.current_scope_id().map(|id| EffectScope {
            id,
            runtime: self.downgrade(),
        })
    }
}
