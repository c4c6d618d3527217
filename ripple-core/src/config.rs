//! Runtime configuration.

use serde::Deserialize;

/// How queued jobs get flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// The host calls [`Runtime::flush`](crate::Runtime::flush) itself.
    #[default]
    Manual,
    /// The first queued job spawns one local tokio task that flushes once
    /// the current synchronous work yields. Requires a `LocalSet`.
    Tokio,
}

/// Settings for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times one job (or one recursive effect) may re-run within a
    /// single flush before it is stopped.
    pub recursion_limit: usize,
    /// Flush driver.
    pub flush: FlushMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            flush: FlushMode::Manual,
        }
    }
}
