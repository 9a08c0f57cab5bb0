use std::time::Duration;

use thiserror::Error;

/// Failures surfaced to callers.
///
/// Everything else (stream read errors, decode errors, JSON parse errors,
/// persistence errors) is contained by the orchestrator and degrades into
/// sentinel results instead of propagating.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("command timed out after {limit:?}")]
    Timeout { limit: Duration },
}
