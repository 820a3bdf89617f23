//! Rolling observation windows: exact aggregates, bounded inspection rings.
//!
//! Counters and latency sample lists are exact and never truncated; the
//! event and snapshot ring buffers exist only for inspection and evict
//! oldest-first on overflow. Aggregate math never reads the rings.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::metrics::event::{QueueEvent, QueueSnapshot};

/// Exact per-window transition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounters {
    /// Tasks that entered the queue.
    pub enqueued: u64,
    /// Tasks that completed successfully.
    pub completed: u64,
    /// Tasks the executor failed.
    pub failed: u64,
    /// Tasks cancelled (pending or running).
    pub cancelled: u64,
    /// Tasks that exceeded their timeout budget.
    pub timed_out: u64,
    /// Circuit-open transitions.
    pub circuit_opens: u64,
    /// Gate deferrals on insufficient memory.
    pub resource_gates: u64,
}

impl WindowCounters {
    /// Fold one event into the counters. Release and circuit-close events
    /// carry latency/diagnostic data but no counter of their own.
    pub(crate) fn apply(&mut self, event: &QueueEvent) {
        match event {
            QueueEvent::Enqueued { .. } => self.enqueued += 1,
            QueueEvent::Completed { .. } => self.completed += 1,
            QueueEvent::Failed { .. } => self.failed += 1,
            QueueEvent::Cancelled { .. } => self.cancelled += 1,
            QueueEvent::TimedOut { .. } => self.timed_out += 1,
            QueueEvent::CircuitOpened { .. } => self.circuit_opens += 1,
            QueueEvent::ResourceBlocked { .. } => self.resource_gates += 1,
            QueueEvent::Released { .. } | QueueEvent::CircuitClosed { .. } => {}
        }
    }

    /// Terminal outcomes observed in this window.
    pub fn terminal_total(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.timed_out
    }
}

/// Unbounded running totals since collector start, independent of window
/// rotation and history eviction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LifetimeStats {
    /// When the collector started counting, milliseconds since epoch.
    pub started_at_ms: u128,
    /// Running totals, same taxonomy as the per-window counters.
    pub totals: WindowCounters,
}

/// Mean/P95/max over one latency sample set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Arithmetic mean in milliseconds; 0 with no samples.
    pub mean_ms: f64,
    /// 95th percentile in milliseconds; 0 with no samples.
    pub p95_ms: u64,
    /// Maximum in milliseconds; 0 with no samples.
    pub max_ms: u64,
    /// Number of samples observed.
    pub samples: usize,
}

impl LatencySummary {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        Self {
            #[allow(clippy::cast_precision_loss)]
            mean_ms: sum as f64 / sorted.len() as f64,
            p95_ms: percentile(&sorted, 95.0),
            max_ms: *sorted.last().expect("non-empty"),
            samples: sorted.len(),
        }
    }
}

/// Average/max pending depth over the window's snapshot samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthSummary {
    /// Mean pending depth; 0 with no samples.
    pub avg: f64,
    /// Maximum observed pending depth.
    pub max: usize,
    /// Number of depth samples observed.
    pub samples: usize,
}

impl DepthSummary {
    fn from_samples(samples: &[usize]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let sum: usize = samples.iter().sum();
        Self {
            #[allow(clippy::cast_precision_loss)]
            avg: sum as f64 / samples.len() as f64,
            max: *samples.iter().max().expect("non-empty"),
            samples: samples.len(),
        }
    }
}

/// Finalized, immutable view of one observation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowReport {
    /// Window start, milliseconds since epoch.
    pub window_start_ms: u128,
    /// Window end; `None` for a still-active window reported on demand.
    pub window_end_ms: Option<u128>,
    /// Exact transition counters.
    pub counters: WindowCounters,
    /// Pending-wait latency (enqueue to release).
    pub wait: LatencySummary,
    /// Execution latency (release to completion).
    pub exec: LatencySummary,
    /// Pending-depth statistics from periodic snapshots.
    pub depth: DepthSummary,
    /// Completions per elapsed minute; 0 with no elapsed time.
    pub throughput_per_minute: f64,
    /// Completed ÷ terminal outcomes; 0 (not NaN) with no terminals.
    pub success_rate: f64,
}

/// The active, mutable observation window.
pub(crate) struct MetricsWindow {
    start_ms: u128,
    counters: WindowCounters,
    wait_samples: Vec<u64>,
    exec_samples: Vec<u64>,
    depth_samples: Vec<usize>,
    events: VecDeque<QueueEvent>,
    snapshots: VecDeque<QueueSnapshot>,
    event_cap: usize,
    snapshot_cap: usize,
}

impl MetricsWindow {
    pub(crate) fn new(start_ms: u128, event_cap: usize, snapshot_cap: usize) -> Self {
        Self {
            start_ms,
            counters: WindowCounters::default(),
            wait_samples: Vec::new(),
            exec_samples: Vec::new(),
            depth_samples: Vec::new(),
            events: VecDeque::with_capacity(event_cap.min(1024)),
            snapshots: VecDeque::with_capacity(snapshot_cap.min(1024)),
            event_cap,
            snapshot_cap,
        }
    }

    pub(crate) fn start_ms(&self) -> u128 {
        self.start_ms
    }

    /// Fold one event: counters, exact sample lists, and the inspection
    /// ring. Ring eviction never touches counters or samples.
    pub(crate) fn record(&mut self, event: &QueueEvent) {
        self.counters.apply(event);
        match event {
            QueueEvent::Released { wait_ms, .. } => self.wait_samples.push(*wait_ms),
            QueueEvent::Completed { exec_ms, .. } => self.exec_samples.push(*exec_ms),
            _ => {}
        }
        if self.events.len() >= self.event_cap {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
    }

    /// Store one periodic state snapshot: exact depth sample plus the
    /// inspection ring.
    pub(crate) fn push_snapshot(&mut self, snapshot: QueueSnapshot) {
        self.depth_samples.push(snapshot.depth);
        if self.snapshots.len() >= self.snapshot_cap {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    /// Compute the finalized view against `end_ms`. Pure: repeated calls
    /// on an unchanged window yield identical aggregates, so reporting a
    /// still-open window never double-counts.
    pub(crate) fn report(&self, end_ms: u128, closed: bool) -> WindowReport {
        let elapsed_ms = end_ms.saturating_sub(self.start_ms);
        #[allow(clippy::cast_precision_loss)]
        let elapsed_minutes = elapsed_ms as f64 / 60_000.0;
        let throughput_per_minute = if elapsed_minutes > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let completed = self.counters.completed as f64;
            completed / elapsed_minutes
        } else {
            0.0
        };
        let terminal = self.counters.terminal_total();
        let success_rate = if terminal > 0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.counters.completed as f64 / terminal as f64;
            rate
        } else {
            0.0
        };
        WindowReport {
            window_start_ms: self.start_ms,
            window_end_ms: closed.then_some(end_ms),
            counters: self.counters,
            wait: LatencySummary::from_samples(&self.wait_samples),
            exec: LatencySummary::from_samples(&self.exec_samples),
            depth: DepthSummary::from_samples(&self.depth_samples),
            throughput_per_minute,
            success_rate,
        }
    }

    /// Tail of the event ring, newest last.
    pub(crate) fn recent_events(&self, limit: usize) -> Vec<QueueEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Full event ring for export.
    pub(crate) fn events(&self) -> Vec<QueueEvent> {
        self.events.iter().cloned().collect()
    }

    /// Full snapshot ring for export.
    pub(crate) fn snapshots(&self) -> Vec<QueueSnapshot> {
        self.snapshots.iter().cloned().collect()
    }
}

/// Percentile over a sorted sample list:
/// `index = clamp(ceil(p/100 · n) − 1, 0, n − 1)`. Empty lists yield 0.
pub(crate) fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rank = (p / 100.0 * sorted.len() as f64).ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = (rank as usize).saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}
