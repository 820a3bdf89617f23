//! Resource gate: free-memory admission checks.
//!
//! Before a dequeue becomes `running`, the gate compares the currently
//! reported free accelerator memory against the head task's declared
//! requirement. The reading is sampled, not reserved: a race between the
//! gate's check and another consumer of the same memory is an accepted,
//! documented gap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A point-in-time accelerator memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    /// Free accelerator memory in MB.
    pub free_mb: u64,
    /// Total accelerator memory in MB.
    pub total_mb: u64,
}

/// Source of live memory readings, queried before each release attempt.
///
/// Implementations should be cheap: the queue samples under its state lock.
/// Returning `None` means the probe cannot currently read the accelerator;
/// the gate then admits rather than wedging the queue on an unreadable
/// probe.
pub trait ResourceProbe: Send + Sync {
    /// Sample current free/total memory, if available.
    fn sample(&self) -> Option<MemoryReading>;
}

/// Resource availability surfaced through queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Free accelerator memory in MB at sampling time.
    pub free_mb: u64,
    /// Total accelerator memory in MB.
    pub total_mb: u64,
    /// Configured headroom kept free on top of per-task requirements.
    pub reserve_mb: u64,
}

/// Outcome of a gate check for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Enough memory is free (or no probe is wired); the task may run.
    Admit,
    /// Insufficient memory: the head task stays pending.
    Block {
        /// Free MB at check time.
        free_mb: u64,
        /// MB the task declared it needs (reserve included).
        required_mb: u64,
    },
}

/// Admission check comparing live free memory to a task's requirement.
pub struct ResourceGate {
    probe: Option<Arc<dyn ResourceProbe>>,
    reserve_mb: u64,
}

impl ResourceGate {
    /// Create a gate. Without a probe every check admits.
    pub fn new(probe: Option<Arc<dyn ResourceProbe>>, reserve_mb: u64) -> Self {
        Self { probe, reserve_mb }
    }

    /// Configured headroom in MB.
    pub fn reserve_mb(&self) -> u64 {
        self.reserve_mb
    }

    /// Check whether a task needing `required_mb` may take the slot.
    pub fn check(&self, required_mb: u64) -> GateDecision {
        let Some(reading) = self.probe.as_ref().and_then(|p| p.sample()) else {
            return GateDecision::Admit;
        };
        let needed = required_mb.saturating_add(self.reserve_mb);
        if reading.free_mb >= needed {
            GateDecision::Admit
        } else {
            GateDecision::Block {
                free_mb: reading.free_mb,
                required_mb: needed,
            }
        }
    }

    /// Current readings for state exposure, if a probe is wired.
    pub fn status(&self) -> Option<ResourceStatus> {
        let reading = self.probe.as_ref()?.sample()?;
        Some(ResourceStatus {
            free_mb: reading.free_mb,
            total_mb: reading.total_mb,
            reserve_mb: self.reserve_mb,
        })
    }
}

/// Settable in-process probe for development and tests.
///
/// Real deployments wire a probe backed by the accelerator driver; this one
/// reports whatever the test last stored.
#[derive(Debug)]
pub struct FixedProbe {
    free_mb: AtomicU64,
    total_mb: AtomicU64,
}

impl FixedProbe {
    /// Create a probe reporting the given readings.
    pub fn new(free_mb: u64, total_mb: u64) -> Arc<Self> {
        Arc::new(Self {
            free_mb: AtomicU64::new(free_mb),
            total_mb: AtomicU64::new(total_mb),
        })
    }

    /// Update the reported free memory.
    pub fn set_free_mb(&self, free_mb: u64) {
        self.free_mb.store(free_mb, Ordering::Release);
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> Option<MemoryReading> {
        Some(MemoryReading {
            free_mb: self.free_mb.load(Ordering::Acquire),
            total_mb: self.total_mb.load(Ordering::Acquire),
        })
    }
}
