//! Typed queue events and periodic state snapshots.
//!
//! Every queue transition emits exactly one event; the collector folds them
//! into the active window. Each event type is a closed variant carrying only
//! the fields that event needs.

use serde::{Deserialize, Serialize};

use crate::core::gate::ResourceStatus;
use crate::core::task::{Priority, TaskId, TaskKind, TaskStatus};

/// Why a circuit closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitCloseReason {
    /// The configured cool-down elapsed.
    CooldownElapsed,
    /// An explicit external reset.
    ManualReset,
}

/// One queue transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A task entered the pending queue.
    Enqueued {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Priority tier.
        priority: Priority,
        /// Pending depth after the insert.
        depth: usize,
    },
    /// A task passed admission and took the execution slot.
    Released {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Priority tier.
        priority: Priority,
        /// Milliseconds spent pending before release.
        wait_ms: u64,
    },
    /// The executor reported success.
    Completed {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Milliseconds between release and completion.
        exec_ms: u64,
    },
    /// The executor reported failure.
    Failed {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Failure description from the executor.
        error: String,
        /// Consecutive-failure streak after this failure.
        consecutive_failures: u32,
    },
    /// A task was cancelled — synchronously while pending, or at
    /// executor report-back after intent was recorded while running.
    Cancelled {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Whether the task held the execution slot when intent was recorded.
        was_running: bool,
    },
    /// A running task exceeded its timeout budget. Counts toward the
    /// failure streak but is logged under its own type for diagnosis.
    TimedOut {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// The budget that elapsed, in milliseconds.
        timeout_ms: u64,
        /// Consecutive-failure streak after this timeout.
        consecutive_failures: u32,
    },
    /// The failure streak reached the threshold; admission is frozen.
    CircuitOpened {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Streak length at the moment of opening.
        consecutive_failures: u32,
        /// Cool-down the circuit will hold for, in milliseconds.
        cooldown_ms: u64,
    },
    /// Admission resumed.
    CircuitClosed {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// What closed the circuit.
        reason: CircuitCloseReason,
    },
    /// The gate blocked the head task on insufficient free memory.
    ResourceBlocked {
        /// Event timestamp, milliseconds since epoch.
        at_ms: u128,
        /// Task identifier of the blocked head.
        task_id: TaskId,
        /// Task classification.
        kind: TaskKind,
        /// Free MB at check time.
        free_mb: u64,
        /// MB the task needs (configured reserve included).
        required_mb: u64,
    },
}

impl QueueEvent {
    /// Event timestamp in milliseconds since epoch.
    pub fn at_ms(&self) -> u128 {
        match self {
            Self::Enqueued { at_ms, .. }
            | Self::Released { at_ms, .. }
            | Self::Completed { at_ms, .. }
            | Self::Failed { at_ms, .. }
            | Self::Cancelled { at_ms, .. }
            | Self::TimedOut { at_ms, .. }
            | Self::CircuitOpened { at_ms, .. }
            | Self::CircuitClosed { at_ms, .. }
            | Self::ResourceBlocked { at_ms, .. } => *at_ms,
        }
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Enqueued { task_id, .. }
            | Self::Released { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id, .. }
            | Self::TimedOut { task_id, .. }
            | Self::ResourceBlocked { task_id, .. } => Some(*task_id),
            Self::CircuitOpened { .. } | Self::CircuitClosed { .. } => None,
        }
    }

    /// The terminal status this event lands a task in, if it is a
    /// terminal transition.
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            Self::Completed { .. } => Some(TaskStatus::Succeeded),
            Self::Failed { .. } => Some(TaskStatus::Failed),
            Self::TimedOut { .. } => Some(TaskStatus::TimedOut),
            Self::Cancelled { .. } => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Stable label for logs and dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Released { .. } => "released",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitClosed { .. } => "circuit_closed",
            Self::ResourceBlocked { .. } => "resource_blocked",
        }
    }
}

/// Point-in-time queue observation captured by the sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Sample timestamp, milliseconds since epoch.
    pub at_ms: u128,
    /// Pending depth.
    pub depth: usize,
    /// Whether the execution slot is occupied.
    pub is_running: bool,
    /// Current consecutive-failure streak.
    pub consecutive_failures: u32,
    /// Whether admission is frozen.
    pub is_circuit_open: bool,
    /// Resource readings, when a probe is wired.
    pub resource: Option<ResourceStatus>,
}
