//! Task model: identity, classification, priority, lifecycle, cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

/// Unique task identifier, assigned at enqueue.
pub type TaskId = Uuid;

/// Domain classification of the generation work a task represents
/// (e.g. `keyframe-image` vs `full-video`). Keys the per-kind resource
/// requirement table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(String);

impl TaskKind {
    /// Create a kind from any string-like value.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKind {
    fn from(kind: &str) -> Self {
        Self(kind.to_owned())
    }
}

/// Priority tier used for queue ordering. Higher tiers dequeue first;
/// order within a tier is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work, dequeued last.
    Low,
    /// Default tier.
    Normal,
    /// Urgent work, dequeued first.
    High,
}

impl Priority {
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }
}

/// Status of a task in the admission lifecycle.
///
/// `Pending → Running → {Succeeded | Failed | TimedOut}`, or
/// `Pending|Running → Cancelled`. The four right-hand states are terminal;
/// no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for admission.
    Pending,
    /// Released to the executor; holds the single execution slot.
    Running,
    /// Executor reported success.
    Succeeded,
    /// Executor reported failure.
    Failed,
    /// The timeout budget elapsed before the executor reported back.
    TimedOut,
    /// Removed while pending, or cancelled by intent while running.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// What producers submit. The payload is opaque to the queue and is handed
/// to the executor untouched at release.
#[derive(Debug, Clone)]
pub struct TaskSpec<P> {
    /// Domain classification; must be non-empty.
    pub kind: TaskKind,
    /// Priority tier.
    pub priority: Priority,
    /// Opaque payload for the executor.
    pub payload: P,
    /// Timeout budget in milliseconds; falls back to the configured default.
    pub timeout_ms: Option<u64>,
    /// Declared accelerator-memory requirement in MB; falls back to the
    /// per-kind requirement table.
    pub required_mb: Option<u64>,
}

impl<P> TaskSpec<P> {
    /// Create a spec with defaults for timeout and resource requirement.
    pub fn new(kind: impl Into<TaskKind>, priority: Priority, payload: P) -> Self {
        Self {
            kind: kind.into(),
            priority,
            payload,
            timeout_ms: None,
            required_mb: None,
        }
    }

    /// Override the timeout budget.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override the declared resource requirement.
    pub fn with_required_mb(mut self, required_mb: u64) -> Self {
        self.required_mb = Some(required_mb);
        self
    }
}

/// Scheduling metadata stamped by the queue. Terminal tasks are not retained
/// beyond their event-log entries; their effect lives on in folded aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Unique identifier assigned at enqueue.
    pub id: TaskId,
    /// Domain classification.
    pub kind: TaskKind,
    /// Priority tier.
    pub priority: Priority,
    /// Resolved accelerator-memory requirement in MB.
    pub required_mb: u64,
    /// Resolved timeout budget in milliseconds.
    pub timeout_ms: u64,
    /// Enqueue timestamp, milliseconds since epoch.
    pub enqueued_at_ms: u128,
    /// Release timestamp, stamped when the task takes the execution slot.
    pub started_at_ms: Option<u128>,
}

/// A task released to the executor: metadata plus the submitted payload.
#[derive(Debug)]
pub struct ReleasedTask<P> {
    /// Scheduling metadata, with `started_at_ms` stamped.
    pub meta: TaskMeta,
    /// Payload supplied at enqueue.
    pub payload: P,
}

/// Cancellation-intent signal handed to the executor alongside a released
/// task. Cancelling a running task only sets this flag; actually stopping
/// the work is the executor's responsibility.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    requested: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Create a fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Record cancellation intent and wake any waiter.
    pub(crate) fn set(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Wait until cancellation is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a set() between the check and
            // the await cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
