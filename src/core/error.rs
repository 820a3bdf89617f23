//! Error types for admission and scheduling operations.

use thiserror::Error;

use crate::core::task::TaskId;

/// Errors produced by the admission queue.
///
/// Executor failures, timeouts, resource deferrals, and open-circuit holds
/// are deliberately *not* represented here: they become queue state and
/// events, never `Err` returns. Only synchronous rejection (a malformed or
/// over-limit submission) and contract violations (reporting an outcome for
/// a task that is not running) surface as errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task submission was malformed and was rejected before entering the queue.
    #[error("invalid task: {0}")]
    Validation(String),
    /// The configured pending-depth bound is reached.
    #[error("queue full: {0} tasks pending")]
    QueueFull(usize),
    /// No pending or running task has this id.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    /// An outcome was reported for a task that is not the running task.
    /// This signals a caller bug, not a runtime condition.
    #[error("task {0} is not running")]
    NotRunning(TaskId),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
