//! Graph Nodes
//!
//! This module defines the records that live in the dependency graph:
//! dependencies, the links between them and their subscribers, the
//! subscribers themselves, and scopes.
//!
//! # Link Layout
//!
//! A link sits on two intrusive doubly-linked lists at once:
//!
//! - the subscriber's dependency list (`prev_dep` / `next_dep`), ordered by
//!   first access during the latest run
//! - the dependency's subscriber list (`prev_sub` / `next_sub`), unordered
//!
//! Both lists are threaded through `LinkId`s, so inserting or removing a
//! link is O(1) on either side.

use std::any::Any;
use std::rc::{Rc, Weak};

use super::arena::arena_key;

arena_key! {
    /// Handle to a dependency (one trackable mutation point).
    pub struct DepId;
}

arena_key! {
    /// Handle to a link between a dependency and a subscriber.
    pub struct LinkId;
}

arena_key! {
    /// Handle to a subscriber (an effect or a computed).
    pub struct SubscriberId;
}

arena_key! {
    /// Handle to an effect scope.
    pub struct ScopeId;
}

/// Values released by the graph that must be dropped after the graph borrow
/// ends, since dropping them may run arbitrary destructors.
pub(crate) type Garbage = Box<dyn Any>;

/// Subscriber state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubFlags(u16);

impl SubFlags {
    /// The subscriber is live and re-runs on notification.
    pub const ACTIVE: SubFlags = SubFlags(1 << 0);
    /// The subscriber's function is executing.
    pub const RUNNING: SubFlags = SubFlags(1 << 1);
    /// The subscriber sits in the current batch.
    pub const NOTIFIED: SubFlags = SubFlags(1 << 2);
    /// A computed whose cached value may be stale.
    pub const DIRTY: SubFlags = SubFlags(1 << 3);
    /// Notifications received while running are honoured.
    pub const ALLOW_RECURSE: SubFlags = SubFlags(1 << 4);
    /// Notifications are parked until resume.
    pub const PAUSED: SubFlags = SubFlags(1 << 5);
    /// A computed has produced at least one value.
    pub const EVALUATED: SubFlags = SubFlags(1 << 6);
    /// A recursive notification arrived during a run.
    pub const RERUN: SubFlags = SubFlags(1 << 7);

    /// No bits set.
    pub const fn empty() -> Self {
        SubFlags(0)
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: SubFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: SubFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: SubFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for SubFlags {
    type Output = SubFlags;

    fn bitor(self, rhs: SubFlags) -> SubFlags {
        SubFlags(self.0 | rhs.0)
    }
}

/// One reactive mutation point.
#[derive(Debug, Default)]
pub struct DepNode {
    /// Incremented on every trigger; never decreases.
    pub version: u64,
    /// Head of the subscriber list.
    pub subs_head: Option<LinkId>,
    /// Tail of the subscriber list.
    pub subs_tail: Option<LinkId>,
    /// The link of the subscriber currently running against this
    /// dependency, used to find an existing link in O(1) during `track`.
    pub active_link: Option<LinkId>,
    /// The computed whose output this dependency represents.
    pub owner: Option<SubscriberId>,
    /// Number of links on the subscriber list.
    pub sub_count: usize,
}

impl DepNode {
    /// A dependency owned by a computed.
    pub fn owned_by(owner: SubscriberId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }
}

/// Edge recording that a subscriber observed a dependency.
#[derive(Debug)]
pub struct LinkNode {
    pub dep: DepId,
    pub sub: SubscriberId,
    /// The dependency version as of the subscriber's last run. `None`
    /// while a run is in progress and the link has not been re-confirmed.
    pub version: Option<u64>,
    pub prev_dep: Option<LinkId>,
    pub next_dep: Option<LinkId>,
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,
    /// The dependency's `active_link` before this subscriber's run began.
    pub prev_active_link: Option<LinkId>,
}

impl LinkNode {
    pub fn new(dep: DepId, sub: SubscriberId, version: u64) -> Self {
        Self {
            dep,
            sub,
            version: Some(version),
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
            prev_active_link: None,
        }
    }
}

/// Type-erased recomputation hook of a computed.
pub(crate) trait Recompute {
    /// Run the getter and store the result. Returns whether the stored
    /// value differs from the previous one.
    fn recompute(&self) -> bool;
}

/// What a subscriber does when it runs.
pub(crate) enum SubKind {
    Effect {
        run: Rc<dyn Fn()>,
        scheduler: Option<Rc<dyn Fn()>>,
        cleanups: Vec<Box<dyn FnOnce()>>,
        on_stop: Option<Box<dyn FnOnce()>>,
    },
    Computed {
        dep: DepId,
        core: Weak<dyn Recompute>,
        global_version: Option<u64>,
    },
}

/// A re-runnable computation.
pub(crate) struct SubNode {
    pub flags: SubFlags,
    pub deps_head: Option<LinkId>,
    pub deps_tail: Option<LinkId>,
    pub kind: SubKind,
    pub scope: Option<ScopeId>,
}

impl SubNode {
    pub fn effect(run: Rc<dyn Fn()>, scheduler: Option<Rc<dyn Fn()>>, allow_recurse: bool) -> Self {
        let mut flags = SubFlags::ACTIVE;
        if allow_recurse {
            flags.insert(SubFlags::ALLOW_RECURSE);
        }
        Self {
            flags,
            deps_head: None,
            deps_tail: None,
            kind: SubKind::Effect {
                run,
                scheduler,
                cleanups: Vec::new(),
                on_stop: None,
            },
            scope: None,
        }
    }

    /// A computed starts dirty so the first read evaluates it. Its
    /// dependency is attached once the computed has been inserted.
    pub fn computed(core: Weak<dyn Recompute>) -> Self {
        Self {
            flags: SubFlags::ACTIVE | SubFlags::DIRTY,
            deps_head: None,
            deps_tail: None,
            kind: SubKind::Computed {
                dep: DepId::placeholder(),
                core,
                global_version: None,
            },
            scope: None,
        }
    }

    /// The dependency representing this subscriber's output, if it is a
    /// computed.
    pub fn output_dep(&self) -> Option<DepId> {
        match &self.kind {
            SubKind::Computed { dep, .. } => Some(*dep),
            SubKind::Effect { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.kind, SubKind::Computed { .. })
    }
}

impl DepId {
    /// A key that never resolves, used before the real dependency exists.
    pub(crate) fn placeholder() -> Self {
        <Self as super::arena::ArenaKey>::from_parts(u32::MAX as usize, u32::MAX)
    }
}

/// A lifetime container for effects, child scopes and cleanups.
#[derive(Default)]
pub(crate) struct ScopeNode {
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// Position in the parent's `children`, kept current by swap-removal.
    pub index_in_parent: Option<usize>,
    pub effects: Vec<SubscriberId>,
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    pub active: bool,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = SubFlags::ACTIVE;
        assert!(flags.contains(SubFlags::ACTIVE));
        assert!(!flags.contains(SubFlags::RUNNING));

        flags.insert(SubFlags::RUNNING | SubFlags::DIRTY);
        assert!(flags.contains(SubFlags::RUNNING | SubFlags::DIRTY));

        flags.remove(SubFlags::RUNNING);
        assert!(!flags.contains(SubFlags::RUNNING));
        assert!(flags.contains(SubFlags::ACTIVE | SubFlags::DIRTY));
    }

    #[test]
    fn computed_starts_dirty() {
        struct Never;
        impl Recompute for Never {
            fn recompute(&self) -> bool {
                false
            }
        }

        let core: Rc<dyn Recompute> = Rc::new(Never);
        let node = SubNode::computed(Rc::downgrade(&core));
        assert!(node.flags.contains(SubFlags::DIRTY));
        assert!(node.is_computed());
    }

    #[test]
    fn new_link_carries_dependency_version() {
        let link = LinkNode::new(DepId::placeholder(), SubscriberId::from_parts_for_test(), 4);
        assert_eq!(link.version, Some(4));
        assert!(link.next_dep.is_none() && link.prev_sub.is_none());
    }

    impl SubscriberId {
        fn from_parts_for_test() -> Self {
            <Self as crate::graph::arena::ArenaKey>::from_parts(0, 0)
        }
    }
}
