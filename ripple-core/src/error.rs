//! Error types for the reactive runtime.
//!
//! The dependency graph itself never fails: missing dependencies are created
//! lazily and stale links are pruned. What can fail is user code (reported
//! by the scheduler), container index bounds, and running a stopped scope.

use std::any::Any;

use thiserror::Error;

/// Errors surfaced by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// `EffectScope::run` was called after the scope was stopped.
    #[error("cannot run an inactive effect scope")]
    ScopeStopped,

    /// A write addressed an index past the end of a reactive vector.
    #[error("index {index} is out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A queued job panicked during a flush.
    #[error("job {job} panicked: {message}")]
    JobPanicked { job: String, message: String },

    /// A job kept re-queueing itself within one flush.
    #[error("job {job} exceeded {limit} recursive updates in a single flush")]
    RecursionLimit { job: String, limit: usize },
}

/// Every failure collected while draining the job queues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} job(s) failed during flush", .failures.len())]
pub struct FlushError {
    pub failures: Vec<ReactiveError>,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
