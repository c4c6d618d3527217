//! Dependency Graph
//!
//! This module implements the bookkeeping behind automatic dependency
//! tracking: which subscribers observed which dependencies, and at what
//! version.
//!
//! # Overview
//!
//! - Dependencies are mutation points (a signal, a container key, a
//!   computed's output). Each owns a monotonically increasing version.
//! - Subscribers are effects and computeds. Each owns an ordered list of
//!   links, one per dependency it read during its latest run.
//! - Links connect exactly one dependency to one subscriber and remember
//!   the dependency version the subscriber last observed.
//!
//! # Design Decisions
//!
//! 1. All records live in generational arenas and point at each other by
//!    key. There is no reference counting between graph records, and a
//!    freed key can never alias a newer record.
//!
//! 2. Links are threaded through two intrusive lists so that tracking,
//!    re-tracking and pruning are all O(1) per link.
//!
//! 3. The graph never calls user code. Closures it releases (stopped
//!    effects, cleanups) are parked in a garbage list that the runtime
//!    drops after it has released its borrow of the graph.

pub(crate) mod arena;
mod node;
mod scheduler;

use indexmap::IndexSet;
use smallvec::SmallVec;

use arena::Arena;
pub(crate) use node::{Garbage, Recompute, ScopeNode, SubKind, SubNode};
pub use node::{DepId, DepNode, LinkId, LinkNode, ScopeId, SubFlags, SubscriberId};
pub use scheduler::{FlushReport, Job, JobFlags, JobQueue, Scheduler};

/// The reactive dependency graph.
pub struct Graph {
    pub(crate) deps: Arena<DepId, DepNode>,
    pub(crate) links: Arena<LinkId, LinkNode>,
    pub(crate) subs: Arena<SubscriberId, SubNode>,
    pub(crate) scopes: Arena<ScopeId, ScopeNode>,

    /// The subscriber whose run is collecting dependencies.
    pub(crate) active_sub: Option<SubscriberId>,
    /// Whether reads should be tracked at all.
    pub(crate) should_track: bool,
    track_stack: Vec<bool>,

    /// The scope new effects and scopes attach to.
    pub(crate) active_scope: Option<ScopeId>,

    /// Nesting depth of open notification batches.
    pub(crate) batch_depth: u32,
    batched_computeds: Vec<SubscriberId>,
    batched_effects: Vec<SubscriberId>,

    /// Paused effects that were notified while paused.
    pub(crate) paused_notified: IndexSet<SubscriberId>,

    /// Bumped on every trigger anywhere in the graph.
    pub(crate) global_version: u64,

    garbage: Vec<Garbage>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            deps: Arena::new(),
            links: Arena::new(),
            subs: Arena::new(),
            scopes: Arena::new(),
            active_sub: None,
            should_track: true,
            track_stack: Vec::new(),
            active_scope: None,
            batch_depth: 0,
            batched_computeds: Vec::new(),
            batched_effects: Vec::new(),
            paused_notified: IndexSet::new(),
            global_version: 0,
            garbage: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    /// Create a free-standing dependency.
    pub fn create_dep(&mut self) -> DepId {
        self.deps.insert(DepNode::default())
    }

    /// Remove a dependency, unlinking every subscriber that observed it.
    pub fn remove_dep(&mut self, dep: DepId) {
        let mut cursor = self.deps.get(dep).and_then(|node| node.subs_head);
        while let Some(link) = cursor {
            cursor = self.links.get(link).and_then(|l| l.next_sub);
            self.remove_link(link);
        }
        self.deps.remove(dep);
    }

    /// The current version of a dependency.
    pub fn dep_version(&self, dep: DepId) -> Option<u64> {
        self.deps.get(dep).map(|node| node.version)
    }

    /// Subscribers currently linked to a dependency, in subscription order.
    pub fn subscribers_of(&self, dep: DepId) -> Vec<SubscriberId> {
        let mut out = Vec::new();
        let mut cursor = self.deps.get(dep).and_then(|node| node.subs_head);
        while let Some(link) = cursor {
            let Some(node) = self.links.get(link) else { break };
            out.push(node.sub);
            cursor = node.next_sub;
        }
        out
    }

    /// Dependencies a subscriber is linked to, in access order.
    pub fn dependencies_of(&self, sub: SubscriberId) -> Vec<DepId> {
        let mut out = Vec::new();
        let mut cursor = self.subs.get(sub).and_then(|node| node.deps_head);
        while let Some(link) = cursor {
            let Some(node) = self.links.get(link) else { break };
            out.push(node.dep);
            cursor = node.next_dep;
        }
        out
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Insert an effect, attaching it to the active scope if that scope is
    /// still live.
    pub(crate) fn insert_effect(&mut self, mut node: SubNode) -> SubscriberId {
        let scope = self.live_active_scope();
        node.scope = scope;
        let id = self.subs.insert(node);
        if let Some(scope) = scope.and_then(|s| self.scopes.get_mut(s)) {
            scope.effects.push(id);
        }
        id
    }

    /// Insert a computed together with the dependency carrying its output.
    pub(crate) fn insert_computed(&mut self, node: SubNode) -> (SubscriberId, DepId) {
        let id = self.subs.insert(node);
        let dep = self.deps.insert(DepNode::owned_by(id));
        if let Some(SubNode {
            kind: SubKind::Computed { dep: slot, .. },
            ..
        }) = self.subs.get_mut(id)
        {
            *slot = dep;
        }
        (id, dep)
    }

    /// Remove a subscriber and everything it links to. The node is parked
    /// as garbage.
    pub(crate) fn remove_subscriber(&mut self, sub: SubscriberId) {
        self.unlink_all(sub);
        self.paused_notified.shift_remove(&sub);
        if let Some(node) = self.subs.remove(sub) {
            if let Some(dep) = node.output_dep() {
                self.remove_dep(dep);
            }
            self.garbage.push(Box::new(node));
        }
    }

    /// Flags of a subscriber, or empty if it no longer exists.
    pub fn flags(&self, sub: SubscriberId) -> SubFlags {
        self.subs
            .get(sub)
            .map(|node| node.flags)
            .unwrap_or_else(SubFlags::empty)
    }

    pub(crate) fn set_flag(&mut self, sub: SubscriberId, flag: SubFlags) {
        if let Some(node) = self.subs.get_mut(sub) {
            node.flags.insert(flag);
        }
    }

    pub(crate) fn clear_flag(&mut self, sub: SubscriberId, flag: SubFlags) {
        if let Some(node) = self.subs.get_mut(sub) {
            node.flags.remove(flag);
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Whether a read right now would be recorded.
    pub fn is_tracking(&self) -> bool {
        self.should_track && self.active_sub.is_some()
    }

    /// Record that the active subscriber read `dep`.
    ///
    /// Reuses the subscriber's existing link when there is one, moving it
    /// to the tail of the dependency list if this is its first access in
    /// the current run. Returns `None` when tracking is suppressed.
    pub fn track(&mut self, dep: DepId) -> Option<LinkId> {
        let sub = self.active_sub?;
        if !self.should_track {
            return None;
        }
        let node = self.deps.get(dep)?;
        if node.owner == Some(sub) {
            return None;
        }
        let version = node.version;
        let active_link = node.active_link;

        if let Some(link) = active_link {
            if let Some(existing) = self.links.get_mut(link) {
                if existing.sub == sub {
                    if existing.version.is_none() {
                        existing.version = Some(version);
                        self.move_to_tail(sub, link);
                    }
                    return Some(link);
                }
            }
        }

        let mut fresh = LinkNode::new(dep, sub, version);
        fresh.prev_active_link = active_link;
        let link = self.links.insert(fresh);
        if let Some(node) = self.deps.get_mut(dep) {
            node.active_link = Some(link);
        }
        self.append_dep(sub, link);
        self.append_sub(dep, link);
        tracing::trace!(?dep, ?sub, "linked dependency");
        Some(link)
    }

    /// Stamp a link with the version its subscriber has now observed.
    pub fn confirm_link(&mut self, link: LinkId, version: u64) {
        if let Some(node) = self.links.get_mut(link) {
            node.version = Some(version);
        }
    }

    /// Mark every link of `sub` unconfirmed and make each one the active
    /// link of its dependency, ahead of a fresh run.
    pub fn prepare_deps(&mut self, sub: SubscriberId) {
        let mut cursor = self.subs.get(sub).and_then(|node| node.deps_head);
        while let Some(link) = cursor {
            let Some(node) = self.links.get_mut(link) else { break };
            node.version = None;
            cursor = node.next_dep;
            let dep = node.dep;
            let previous = self.deps.get_mut(dep).and_then(|d| d.active_link.replace(link));
            if let Some(node) = self.links.get_mut(link) {
                node.prev_active_link = previous;
            }
        }
    }

    /// Prune links left unconfirmed by the run that just finished and
    /// restore each dependency's previous active link.
    pub fn cleanup_deps(&mut self, sub: SubscriberId) {
        let mut cursor = self.subs.get(sub).and_then(|node| node.deps_tail);
        while let Some(link) = cursor {
            let Some(node) = self.links.get_mut(link) else { break };
            cursor = node.prev_dep;
            let dep = node.dep;
            let stale = node.version.is_none();
            let restore = node.prev_active_link.take();
            if let Some(d) = self.deps.get_mut(dep) {
                d.active_link = restore;
            }
            if stale {
                tracing::trace!(?dep, ?sub, "pruned stale link");
                self.remove_link(link);
            }
        }
    }

    /// Remove every link of `sub`.
    pub fn unlink_all(&mut self, sub: SubscriberId) {
        let mut cursor = self.subs.get(sub).and_then(|node| node.deps_head);
        while let Some(link) = cursor {
            cursor = self.links.get(link).and_then(|l| l.next_dep);
            self.remove_link(link);
        }
    }

    /// Snapshot of a subscriber's links as `(link, dep, observed_version)`.
    pub fn links_of(&self, sub: SubscriberId) -> SmallVec<[(LinkId, DepId, Option<u64>); 8]> {
        let mut out = SmallVec::new();
        let mut cursor = self.subs.get(sub).and_then(|node| node.deps_head);
        while let Some(link) = cursor {
            let Some(node) = self.links.get(link) else { break };
            out.push((link, node.dep, node.version));
            cursor = node.next_dep;
        }
        out
    }

    fn append_dep(&mut self, sub: SubscriberId, link: LinkId) {
        let Some(node) = self.subs.get_mut(sub) else { return };
        let tail = node.deps_tail.replace(link);
        if tail.is_none() {
            node.deps_head = Some(link);
        }
        if let Some(tail) = tail.and_then(|t| self.links.get_mut(t)) {
            tail.next_dep = Some(link);
        }
        if let Some(node) = self.links.get_mut(link) {
            node.prev_dep = tail;
            node.next_dep = None;
        }
    }

    fn append_sub(&mut self, dep: DepId, link: LinkId) {
        let Some(node) = self.deps.get_mut(dep) else { return };
        node.sub_count += 1;
        let tail = node.subs_tail.replace(link);
        if tail.is_none() {
            node.subs_head = Some(link);
        }
        if let Some(tail) = tail.and_then(|t| self.links.get_mut(t)) {
            tail.next_sub = Some(link);
        }
        if let Some(node) = self.links.get_mut(link) {
            node.prev_sub = tail;
            node.next_sub = None;
        }
    }

    fn move_to_tail(&mut self, sub: SubscriberId, link: LinkId) {
        let Some(node) = self.links.get(link) else { return };
        let (prev, Some(next)) = (node.prev_dep, node.next_dep) else {
            // Already the tail.
            return;
        };
        if let Some(n) = self.links.get_mut(next) {
            n.prev_dep = prev;
        }
        match prev.and_then(|p| self.links.get_mut(p)) {
            Some(p) => p.next_dep = Some(next),
            None => {
                if let Some(s) = self.subs.get_mut(sub) {
                    s.deps_head = Some(next);
                }
            }
        }
        self.append_dep(sub, link);
    }

    fn remove_link(&mut self, link: LinkId) {
        let Some(node) = self.links.remove(link) else { return };

        // Subscriber side.
        match node.prev_dep.and_then(|p| self.links.get_mut(p)) {
            Some(p) => p.next_dep = node.next_dep,
            None => {
                if let Some(s) = self.subs.get_mut(node.sub) {
                    if s.deps_head == Some(link) {
                        s.deps_head = node.next_dep;
                    }
                }
            }
        }
        match node.next_dep.and_then(|n| self.links.get_mut(n)) {
            Some(n) => n.prev_dep = node.prev_dep,
            None => {
                if let Some(s) = self.subs.get_mut(node.sub) {
                    if s.deps_tail == Some(link) {
                        s.deps_tail = node.prev_dep;
                    }
                }
            }
        }

        // Dependency side.
        match node.prev_sub.and_then(|p| self.links.get_mut(p)) {
            Some(p) => p.next_sub = node.next_sub,
            None => {
                if let Some(d) = self.deps.get_mut(node.dep) {
                    if d.subs_head == Some(link) {
                        d.subs_head = node.next_sub;
                    }
                }
            }
        }
        match node.next_sub.and_then(|n| self.links.get_mut(n)) {
            Some(n) => n.prev_sub = node.prev_sub,
            None => {
                if let Some(d) = self.deps.get_mut(node.dep) {
                    if d.subs_tail == Some(link) {
                        d.subs_tail = node.prev_sub;
                    }
                }
            }
        }
        if let Some(d) = self.deps.get_mut(node.dep) {
            d.sub_count = d.sub_count.saturating_sub(1);
            if d.active_link == Some(link) {
                d.active_link = node.prev_active_link;
            }
        }
    }

    /// Save the tracking flag and disable tracking.
    pub fn pause_tracking(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = false;
    }

    /// Save the tracking flag and enable tracking.
    pub fn enable_tracking(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = true;
    }

    /// Restore the tracking flag saved by the last pause/enable.
    pub fn reset_tracking(&mut self) {
        self.should_track = self.track_stack.pop().unwrap_or(true);
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    /// Advance a dependency's version ahead of notifying its subscribers.
    pub fn bump_version(&mut self, dep: DepId) -> bool {
        let Some(node) = self.deps.get_mut(dep) else { return false };
        node.version += 1;
        self.global_version += 1;
        true
    }

    /// Open a notification batch.
    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close a notification batch. Returns `true` when the outermost batch
    /// closed and the batched effects should now be triggered.
    pub fn end_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth > 0 {
            return false;
        }
        for sub in std::mem::take(&mut self.batched_computeds) {
            self.clear_flag(sub, SubFlags::NOTIFIED);
        }
        true
    }

    /// Take the effects collected by the batch that just closed.
    pub(crate) fn take_batched_effects(&mut self) -> Vec<SubscriberId> {
        std::mem::take(&mut self.batched_effects)
    }

    /// Fan a change out from `dep` to every linked subscriber. Computeds
    /// are marked dirty and forward the notification to their own readers;
    /// effects are collected into the open batch.
    pub fn collect_notifications(&mut self, dep: DepId) {
        let mut cursor = self.deps.get(dep).and_then(|node| node.subs_head);
        while let Some(link) = cursor {
            let Some(node) = self.links.get(link) else { break };
            cursor = node.next_sub;
            let sub = node.sub;
            if let Some(output) = self.notify_subscriber(sub) {
                self.collect_notifications(output);
            }
        }
    }

    /// Returns the computed's output dependency when the notification must
    /// travel further downstream.
    fn notify_subscriber(&mut self, sub: SubscriberId) -> Option<DepId> {
        let active = self.active_sub;
        let node = self.subs.get_mut(sub)?;
        match &node.kind {
            SubKind::Computed { dep, .. } => {
                let dep = *dep;
                node.flags.insert(SubFlags::DIRTY);
                if !node.flags.contains(SubFlags::NOTIFIED) && active != Some(sub) {
                    node.flags.insert(SubFlags::NOTIFIED);
                    self.batched_computeds.push(sub);
                    return Some(dep);
                }
                None
            }
            SubKind::Effect { .. } => {
                if !node.flags.contains(SubFlags::NOTIFIED) {
                    node.flags.insert(SubFlags::NOTIFIED);
                    self.batched_effects.push(sub);
                }
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn live_active_scope(&self) -> Option<ScopeId> {
        self.active_scope
            .filter(|scope| self.scopes.get(*scope).is_some_and(|s| s.active))
    }

    /// Create a scope. Unless `detached`, it becomes a child of the active
    /// scope.
    pub(crate) fn create_scope(&mut self, detached: bool) -> ScopeId {
        let parent = if detached { None } else { self.live_active_scope() };
        let id = self.scopes.insert(ScopeNode {
            parent,
            active: true,
            ..ScopeNode::default()
        });
        if let Some(parent) = parent.and_then(|p| self.scopes.get_mut(p)) {
            let index = parent.children.len();
            parent.children.push(id);
            if let Some(node) = self.scopes.get_mut(id) {
                node.index_in_parent = Some(index);
            }
        }
        id
    }

    /// Swap-remove a scope from its parent's child list.
    pub(crate) fn detach_scope(&mut self, scope: ScopeId) {
        let Some(node) = self.scopes.get_mut(scope) else { return };
        let (Some(parent), Some(index)) = (node.parent.take(), node.index_in_parent.take()) else {
            return;
        };
        let Some(parent) = self.scopes.get_mut(parent) else { return };
        if index >= parent.children.len() {
            return;
        }
        parent.children.swap_remove(index);
        if let Some(&moved) = parent.children.get(index) {
            if let Some(moved) = self.scopes.get_mut(moved) {
                moved.index_in_parent = Some(index);
            }
        }
    }

    // ------------------------------------------------------------------
    // Garbage
    // ------------------------------------------------------------------

    pub(crate) fn discard(&mut self, value: Garbage) {
        self.garbage.push(value);
    }

    pub(crate) fn take_garbage(&mut self) -> Vec<Garbage> {
        std::mem::take(&mut self.garbage)
    }

    /// Number of live dependencies.
    pub fn dep_count(&self) -> usize {
        self.deps.len()
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    /// Number of live scopes.
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn effect(graph: &mut Graph) -> SubscriberId {
        graph.insert_effect(SubNode::effect(Rc::new(|| {}), None, false))
    }

    /// Simulate a run of `sub` that reads `deps` in order.
    fn run(graph: &mut Graph, sub: SubscriberId, deps: &[DepId]) {
        graph.prepare_deps(sub);
        let previous = graph.active_sub.replace(sub);
        for dep in deps {
            graph.track(*dep);
        }
        graph.active_sub = previous;
        graph.cleanup_deps(sub);
    }

    #[test]
    fn track_creates_one_link_per_dependency() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        let sub = effect(&mut graph);

        run(&mut graph, sub, &[a, a, a]);

        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.subscribers_of(a), vec![sub]);
        assert_eq!(graph.dependencies_of(sub), vec![a]);
    }

    #[test]
    fn track_without_active_subscriber_is_noop() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        assert!(graph.track(a).is_none());
        assert_eq!(graph.link_count(), 0);
    }

    #[test]
    fn paused_tracking_suppresses_links() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        let sub = effect(&mut graph);

        graph.pause_tracking();
        run(&mut graph, sub, &[a]);
        graph.reset_tracking();
        assert_eq!(graph.link_count(), 0);

        run(&mut graph, sub, &[a]);
        assert_eq!(graph.link_count(), 1);
    }

    #[test]
    fn rerun_reorders_and_prunes_links() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        let b = graph.create_dep();
        let c = graph.create_dep();
        let sub = effect(&mut graph);

        run(&mut graph, sub, &[a, b, c]);
        assert_eq!(graph.dependencies_of(sub), vec![a, b, c]);

        // `b` is not read any more; `a` is now read last.
        run(&mut graph, sub, &[c, a]);
        assert_eq!(graph.dependencies_of(sub), vec![c, a]);
        assert!(graph.subscribers_of(b).is_empty());
        assert_eq!(graph.link_count(), 2);

        for dep in [a, b, c] {
            assert!(graph.deps.get(dep).unwrap().active_link.is_none());
        }
    }

    #[test]
    fn nested_runs_restore_active_links() {
        let mut graph = Graph::new();
        let shared = graph.create_dep();
        let outer = effect(&mut graph);
        let inner = effect(&mut graph);

        run(&mut graph, outer, &[shared]);

        // Outer re-runs and, mid-run, the inner subscriber runs against the
        // same dependency before the outer reads it again.
        graph.prepare_deps(outer);
        graph.active_sub = Some(outer);
        graph.track(shared);
        run(&mut graph, inner, &[shared]);
        graph.active_sub = Some(outer);
        graph.track(shared);
        graph.active_sub = None;
        graph.cleanup_deps(outer);

        assert_eq!(graph.subscribers_of(shared), vec![outer, inner]);
        assert_eq!(graph.link_count(), 2);
    }

    #[test]
    fn notifications_collect_each_effect_once() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        let b = graph.create_dep();
        let sub = effect(&mut graph);
        run(&mut graph, sub, &[a, b]);

        graph.start_batch();
        graph.bump_version(a);
        graph.collect_notifications(a);
        graph.bump_version(b);
        graph.collect_notifications(b);
        assert!(graph.end_batch());

        assert_eq!(graph.take_batched_effects(), vec![sub]);
        assert_eq!(graph.global_version, 2);
    }

    #[test]
    fn remove_dep_unlinks_subscribers() {
        let mut graph = Graph::new();
        let a = graph.create_dep();
        let b = graph.create_dep();
        let sub = effect(&mut graph);
        run(&mut graph, sub, &[a, b]);

        graph.remove_dep(a);
        assert_eq!(graph.dependencies_of(sub), vec![b]);
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.dep_count(), 1);
    }

    #[test]
    fn scope_detach_swaps_last_child_into_place() {
        let mut graph = Graph::new();
        let root = graph.create_scope(false);
        graph.active_scope = Some(root);
        let first = graph.create_scope(false);
        let second = graph.create_scope(false);
        let third = graph.create_scope(false);
        graph.active_scope = None;

        graph.detach_scope(first);

        let root_node = graph.scopes.get(root).unwrap();
        assert_eq!(root_node.children, vec![third, second]);
        assert_eq!(graph.scopes.get(third).unwrap().index_in_parent, Some(0));
        assert!(graph.scopes.get(first).unwrap().parent.is_none());
    }
}
