//! Harness errors.

use heapscope::{LifecycleError, ReleaseOutcome};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{count} tracked values were never destructed")]
    Leaked { count: usize },
    #[error("{count} tracked values were destructed more than once")]
    DoubleReleased { count: usize },
    #[error("single release was not idempotent: first {first:?}, then {second:?}")]
    NotIdempotent {
        first: ReleaseOutcome,
        second: ReleaseOutcome,
    },
    #[error("worker thread {index} panicked")]
    WorkerPanicked { index: usize },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
