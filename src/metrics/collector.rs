//! Metrics collector: event folding, window rotation, periodic sampling.
//!
//! The collector observes the queue through events and snapshots and never
//! mutates queue state. It degrades gracefully: missing or partial state
//! becomes zeros/`None`, never an error that could destabilize the queue it
//! observes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MetricsConfig;
use crate::core::queue::{AdmissionQueue, QueueObserver, QueueState};
use crate::core::runner::TaskRunner;
use crate::metrics::event::{QueueEvent, QueueSnapshot};
use crate::metrics::window::{LifetimeStats, MetricsWindow, WindowCounters, WindowReport};
use crate::runtime::Spawn;
use crate::util::clock::now_ms;

/// Pull-style access to live queue state for the sampler.
pub type StateAccessor = Arc<dyn Fn() -> QueueState + Send + Sync>;

/// Rolling summary returned by [`MetricsCollector::summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Live queue state, when a state accessor is wired; `None` otherwise.
    pub current_state: Option<QueueState>,
    /// The active window, finalized on demand without being closed.
    pub current_window: WindowReport,
    /// Retained historical windows, oldest first.
    pub historical_windows: Vec<WindowReport>,
    /// Unbounded totals since collector start.
    pub lifetime: LifetimeStats,
}

/// Full dump for persistence or offline analysis. No on-disk format is
/// mandated; persistence is an external collaborator's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    /// Export timestamp, milliseconds since epoch.
    pub exported_at_ms: u128,
    /// The rolling summary at export time.
    pub summary: MetricsSummary,
    /// Raw event ring of the active window.
    pub events: Vec<QueueEvent>,
    /// Raw snapshot ring of the active window.
    pub snapshots: Vec<QueueSnapshot>,
}

struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct CollectorInner {
    active: MetricsWindow,
    history: VecDeque<WindowReport>,
    lifetime: LifetimeStats,
    accessor: Option<StateAccessor>,
    sampler: Option<SamplerHandle>,
}

struct CollectorShared {
    config: MetricsConfig,
    inner: Mutex<CollectorInner>,
}

/// Rolling-window metrics over queue events and periodic state snapshots.
///
/// Cheaply clonable; all clones share state. Create one per composed queue
/// and wire it with [`hook_metrics`] — there is no process-global instance.
pub struct MetricsCollector {
    shared: Arc<CollectorShared>,
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MetricsCollector {
    /// Create a collector with an empty active window starting now.
    pub fn new(config: MetricsConfig) -> Self {
        let now = now_ms();
        let active = MetricsWindow::new(now, config.event_buffer, config.snapshot_buffer);
        Self {
            shared: Arc::new(CollectorShared {
                config,
                inner: Mutex::new(CollectorInner {
                    active,
                    history: VecDeque::new(),
                    lifetime: LifetimeStats {
                        started_at_ms: now,
                        totals: WindowCounters::default(),
                    },
                    accessor: None,
                    sampler: None,
                }),
            }),
        }
    }

    /// Fold one queue event into the active window and the lifetime totals,
    /// rotating first when the window duration has elapsed.
    pub fn record(&self, event: &QueueEvent) {
        let mut inner = self.shared.inner.lock();
        let now = now_ms();
        Self::rotate_if_due(&self.shared.config, &mut inner, now);
        inner.active.record(event);
        inner.lifetime.totals.apply(event);
    }

    /// Begin periodic sampling of live queue state into the active window.
    /// The ticker is owned by this collector: [`MetricsCollector::stop`]
    /// (or the [`MetricsHook`] teardown) cancels it. Starting an already
    /// started collector replaces the state accessor but keeps the ticker.
    ///
    /// Must be called within a tokio runtime context.
    pub fn start(&self, accessor: StateAccessor) {
        let mut inner = self.shared.inner.lock();
        inner.accessor = Some(Arc::clone(&accessor));
        if inner.sampler.is_some() {
            tracing::warn!("sampler already running, accessor replaced");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.shared);
        let interval = Duration::from_millis(self.shared.config.snapshot_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        Self::sample_once(&shared);
                    }
                }
            }
            tracing::debug!("snapshot sampler stopped");
        });
        inner.sampler = Some(SamplerHandle { shutdown, handle });
    }

    /// Stop the snapshot sampler. Safe to call when not started.
    pub fn stop(&self) {
        let sampler = self.shared.inner.lock().sampler.take();
        if let Some(SamplerHandle { shutdown, handle }) = sampler {
            let _ = shutdown.send(true);
            handle.abort();
        }
    }

    fn sample_once(shared: &Arc<CollectorShared>) {
        // Read queue state before taking our own lock; the accessor takes
        // the queue's.
        let accessor = shared.inner.lock().accessor.clone();
        let Some(accessor) = accessor else { return };
        let state = accessor();
        let now = now_ms();
        let snapshot = QueueSnapshot {
            at_ms: now,
            depth: state.pending,
            is_running: state.is_running,
            consecutive_failures: state.consecutive_failures,
            is_circuit_open: state.is_circuit_open,
            resource: state.resource,
        };
        let mut inner = shared.inner.lock();
        Self::rotate_if_due(&shared.config, &mut inner, now);
        inner.active.push_snapshot(snapshot);
    }

    /// Finalize the active window for reporting without closing it, and
    /// return it with history, lifetime totals, and live state. Calling
    /// this repeatedly with no intervening events yields identical counts.
    pub fn summary(&self) -> MetricsSummary {
        let (current_window, historical_windows, lifetime, accessor) = {
            let mut inner = self.shared.inner.lock();
            let now = now_ms();
            Self::rotate_if_due(&self.shared.config, &mut inner, now);
            (
                inner.active.report(now, false),
                inner.history.iter().cloned().collect::<Vec<_>>(),
                inner.lifetime,
                inner.accessor.clone(),
            )
        };
        MetricsSummary {
            current_state: accessor.map(|get| get()),
            current_window,
            historical_windows,
            lifetime,
        }
    }

    /// Tail of the active window's event ring, newest last.
    pub fn recent_events(&self, limit: usize) -> Vec<QueueEvent> {
        self.shared.inner.lock().active.recent_events(limit)
    }

    /// Full dump: summary plus the active window's raw rings, stamped with
    /// the export time.
    pub fn export(&self) -> MetricsExport {
        let summary = self.summary();
        let inner = self.shared.inner.lock();
        MetricsExport {
            exported_at_ms: now_ms(),
            summary,
            events: inner.active.events(),
            snapshots: inner.active.snapshots(),
        }
    }

    /// Clear all accumulated state: fresh active window, empty history,
    /// zeroed lifetime totals. The sampler, if running, keeps running.
    /// Intended for test isolation.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        let now = now_ms();
        inner.active = MetricsWindow::new(
            now,
            self.shared.config.event_buffer,
            self.shared.config.snapshot_buffer,
        );
        inner.history.clear();
        inner.lifetime = LifetimeStats {
            started_at_ms: now,
            totals: WindowCounters::default(),
        };
    }

    /// Rotate when the window duration has elapsed: finalize the active
    /// window into bounded history (oldest evicted first) and begin a
    /// fresh one at `now`.
    fn rotate_if_due(config: &MetricsConfig, inner: &mut CollectorInner, now: u128) {
        let elapsed = now.saturating_sub(inner.active.start_ms());
        if elapsed < u128::from(config.window_ms) {
            return;
        }
        let report = inner.active.report(now, true);
        tracing::debug!(
            window_start_ms = report.window_start_ms,
            completed = report.counters.completed,
            "metrics window rotated"
        );
        inner.history.push_back(report);
        while inner.history.len() > config.history_limit {
            inner.history.pop_front();
        }
        inner.active = MetricsWindow::new(now, config.event_buffer, config.snapshot_buffer);
    }
}

impl QueueObserver for MetricsCollector {
    fn on_event(&self, event: &QueueEvent) {
        self.record(event);
    }
}

/// Teardown guard returned by [`hook_metrics`]. Unsubscribes the collector
/// and stops its sampler, either explicitly via
/// [`MetricsHook::teardown`] or on drop.
pub struct MetricsHook {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl MetricsHook {
    /// Tear the wiring down now.
    pub fn teardown(mut self) {
        self.run_cleanup();
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for MetricsHook {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

/// Wire a collector to a running queue: subscribe it to queue events and
/// start its sampler off the queue's live state. Returns a teardown guard
/// that stops the ticker and unsubscribes.
///
/// Must be called within a tokio runtime context.
pub fn hook_metrics<P, R, S>(
    queue: &AdmissionQueue<P, R, S>,
    collector: &MetricsCollector,
) -> MetricsHook
where
    P: Send + 'static,
    R: TaskRunner<P>,
    S: Spawn + Send + Sync + 'static,
{
    let subscription = queue.subscribe(Arc::new(collector.clone()));
    let state_queue = queue.clone();
    collector.start(Arc::new(move || state_queue.get_state()));

    let queue = queue.clone();
    let collector = collector.clone();
    MetricsHook {
        cleanup: Some(Box::new(move || {
            queue.unsubscribe(subscription);
            collector.stop();
        })),
    }
}
