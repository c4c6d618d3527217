//! Ripple Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, computeds, effects, scopes, watchers)
//! - Version-based dependency tracking with automatic pruning of stale links
//! - Tracking collections (maps, sets, vectors) with per-key dependencies
//! - A job scheduler that flushes deferred updates in a stable order
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the dependency graph arena and the job scheduler
//! - `reactive`: the runtime handle and the user-facing primitives
//! - `collections`: reactive wrappers around maps, sets and vectors
//!
//! Everything is single-threaded. A [`Runtime`] owns one graph; primitives
//! created from it hold a weak handle back to it.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::Runtime;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.signal(1);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     rt.computed(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = {
//!     let (doubled, log) = (doubled.clone(), Rc::clone(&log));
//!     rt.effect(move || log.borrow_mut().push(doubled.get()))
//! };
//!
//! // Update the signal; the effect runs again right away
//! count.set(5);
//! assert_eq!(*log.borrow(), vec![2, 10]);
//! ```

pub mod collections;
pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use collections::{ReactiveMap, ReactiveSet, ReactiveVec, Readonly};
pub use config::{FlushMode, RuntimeConfig};
pub use error::{FlushError, ReactiveError};
pub use reactive::{
    Computed, Effect, EffectOptions, EffectScope, GraphStats, RenderEffect, Runtime, Signal,
    WatchFlush, WatchHandle, WatchOptions, WeakRuntime,
};
