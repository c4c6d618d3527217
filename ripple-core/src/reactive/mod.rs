//! Reactive Primitives
//!
//! This module implements the user-facing reactive system on top of the
//! dependency graph: signals, computeds, effects, scopes and watchers.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while an effect or computed runs, that computation is linked as a
//! dependent. When the value changes, all dependents are notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when it is read after one of its dependencies changed, and it
//! notifies its own readers only when its result actually differs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change, either inline or through the job scheduler.
//!
//! ## Scopes
//!
//! An EffectScope collects the effects created inside it so they can be
//! stopped together.
//!
//! # Implementation Notes
//!
//! All state lives in a [`Runtime`]. Primitives hold a weak handle to it and
//! a key into its graph, so they are cheap to clone and never keep the
//! runtime alive on their own.

mod computed;
mod context;
mod effect;
mod runtime;
mod scope;
mod signal;
mod watch;

pub use computed::Computed;
pub use effect::{Effect, EffectOptions, RenderEffect};
pub use runtime::{GraphStats, Runtime, WeakRuntime};
pub use scope::EffectScope;
pub use signal::Signal;
pub use watch::{WatchFlush, WatchHandle, WatchOptions};
