//! Admission queue: priority ordering, the single execution slot, breaker
//! and gate consultation, and terminal outcome recording.
//!
//! All queue-mutating operations serialize through one `parking_lot::Mutex`
//! (single-writer discipline); two concurrent completions can never both
//! believe they hold the one slot. Events are buffered under the lock and
//! delivered to observers after it drops, so an observer may call
//! [`AdmissionQueue::get_state`] without deadlocking.
//!
//! Release is level-triggered: every state-changing path (enqueue,
//! completion, failure, timeout, cancellation, circuit close, gate retry)
//! re-invokes the release check. A missed trigger only delays progress,
//! never causes concurrent execution.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::core::breaker::CircuitBreaker;
use crate::core::error::QueueError;
use crate::core::gate::{GateDecision, ResourceGate, ResourceProbe, ResourceStatus};
use crate::core::runner::TaskRunner;
use crate::core::task::{CancelSignal, ReleasedTask, TaskId, TaskMeta, TaskSpec};
use crate::metrics::event::{CircuitCloseReason, QueueEvent};
use crate::runtime::Spawn;
use crate::util::clock::now_ms;

/// Point-in-time view of queue health, for UI and for the metrics sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    /// Pending depth.
    pub pending: usize,
    /// Whether the execution slot is occupied.
    pub is_running: bool,
    /// Current consecutive-failure streak.
    pub consecutive_failures: u32,
    /// Whether admission is frozen.
    pub is_circuit_open: bool,
    /// Resource readings, when a probe is wired.
    pub resource: Option<ResourceStatus>,
}

/// Push-style observation of queue transitions.
///
/// Observers are disciplined listeners, not controllers: they receive each
/// event after the state change lands and must not assume they can influence
/// it. Delivery happens outside the queue's state lock.
pub trait QueueObserver: Send + Sync {
    /// Called once per emitted event, in emission order.
    fn on_event(&self, event: &QueueEvent);
}

/// Handle returned by [`AdmissionQueue::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// What [`AdmissionQueue::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was pending and has been removed outright.
    Removed,
    /// The task holds the execution slot; cancellation intent was recorded.
    /// Bookkeeping becomes consistent when the executor reports back.
    SignalledRunning,
}

/// Pending-heap entry: priority tier first, FIFO within a tier via a
/// monotonic sequence number (stable even for same-millisecond enqueues).
struct PendingEntry<P> {
    seq: u64,
    meta: TaskMeta,
    payload: P,
}

impl<P> PartialEq for PendingEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<P> Eq for PendingEntry<P> {}

impl<P> PartialOrd for PendingEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for PendingEntry<P> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first
        match self
            .meta
            .priority
            .rank()
            .cmp(&other.meta.priority.rank())
        {
            // FIFO within same priority: earlier sequence wins (reversed for max-heap)
            CmpOrdering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

/// The occupied execution slot.
struct RunningSlot {
    meta: TaskMeta,
    cancel: CancelSignal,
}

/// State guarded by the single-writer mutex.
struct QueueInner<P> {
    pending: BinaryHeap<PendingEntry<P>>,
    next_seq: u64,
    running: Option<RunningSlot>,
    breaker: CircuitBreaker,
    gate_retry_scheduled: bool,
}

struct QueueShared<P, R, S> {
    config: QueueConfig,
    gate: ResourceGate,
    runner: R,
    spawner: S,
    inner: Mutex<QueueInner<P>>,
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn QueueObserver>)>>,
    next_subscription: AtomicU64,
}

/// The admission-control and scheduling layer guarding a single accelerator.
///
/// Holds pending tasks ordered by priority tier (FIFO within a tier),
/// enforces a single running slot, consults the [`CircuitBreaker`] and
/// [`ResourceGate`] before releasing the head task, and records terminal
/// outcomes. Cheaply clonable; all clones share state.
pub struct AdmissionQueue<P, R, S> {
    shared: Arc<QueueShared<P, R, S>>,
}

impl<P, R, S> Clone for AdmissionQueue<P, R, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, R, S> AdmissionQueue<P, R, S>
where
    P: Send + 'static,
    R: TaskRunner<P>,
    S: Spawn + Send + Sync + 'static,
{
    /// Create a queue from configuration, an optional resource probe, the
    /// executor contract, and a runtime spawner.
    pub fn new(
        config: QueueConfig,
        probe: Option<Arc<dyn ResourceProbe>>,
        runner: R,
        spawner: S,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker.failure_threshold,
            config.breaker.cooldown_ms,
        );
        let gate = ResourceGate::new(probe, config.gate.reserve_mb);
        Self {
            shared: Arc::new(QueueShared {
                config,
                gate,
                runner,
                spawner,
                inner: Mutex::new(QueueInner {
                    pending: BinaryHeap::new(),
                    next_seq: 0,
                    running: None,
                    breaker,
                    gate_retry_scheduled: false,
                }),
                observers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a task. Validates the spec, stamps identity and enqueue time,
    /// inserts in priority order, and attempts a release. Never blocks.
    pub fn enqueue(&self, spec: TaskSpec<P>) -> Result<TaskId, QueueError> {
        if spec.kind.as_str().is_empty() {
            return Err(QueueError::Validation("kind must be non-empty".into()));
        }
        let timeout_ms = spec
            .timeout_ms
            .unwrap_or(self.shared.config.default_timeout_ms);
        if timeout_ms == 0 {
            return Err(QueueError::Validation(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        let required_mb = spec.required_mb.unwrap_or_else(|| {
            self.shared
                .config
                .gate
                .requirements_mb
                .get(&spec.kind)
                .copied()
                .unwrap_or(0)
        });

        let now = now_ms();
        let id = TaskId::new_v4();
        let meta = TaskMeta {
            id,
            kind: spec.kind,
            priority: spec.priority,
            required_mb,
            timeout_ms,
            enqueued_at_ms: now,
            started_at_ms: None,
        };

        let event = {
            let mut inner = self.shared.inner.lock();
            if let Some(limit) = self.shared.config.max_queue_depth {
                if inner.pending.len() >= limit {
                    return Err(QueueError::QueueFull(inner.pending.len()));
                }
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let event = QueueEvent::Enqueued {
                at_ms: now,
                task_id: id,
                kind: meta.kind.clone(),
                priority: meta.priority,
                depth: inner.pending.len() + 1,
            };
            inner.pending.push(PendingEntry {
                seq,
                meta,
                payload: spec.payload,
            });
            event
        };

        tracing::debug!(task_id = %id, "task enqueued");
        self.emit(std::slice::from_ref(&event));
        self.try_release();
        Ok(id)
    }

    /// Report success for the running task. Resets the failure streak,
    /// frees the slot, and re-attempts release. Reporting an outcome for a
    /// task that is not running is a caller bug and fails fast.
    pub fn complete(&self, task_id: TaskId) -> Result<(), QueueError> {
        let events = {
            let mut inner = self.shared.inner.lock();
            let slot = self.take_running(&mut inner, task_id)?;
            let now = now_ms();
            let mut events = Vec::with_capacity(1);
            if slot.cancel.is_cancelled() {
                // Cancellation intent wins over the reported outcome.
                events.push(QueueEvent::Cancelled {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    was_running: true,
                });
            } else {
                inner.breaker.record_success();
                events.push(QueueEvent::Completed {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    exec_ms: elapsed_ms(slot.meta.started_at_ms.unwrap_or(now), now),
                });
            }
            events
        };

        tracing::info!(task_id = %task_id, "completion reported");
        self.emit(&events);
        self.try_release();
        Ok(())
    }

    /// Report failure for the running task. Increments the failure streak;
    /// crossing the threshold opens the circuit and withholds release until
    /// the cool-down elapses.
    pub fn fail(&self, task_id: TaskId, error: anyhow::Error) -> Result<(), QueueError> {
        let (events, cooldown_deadline) = {
            let mut inner = self.shared.inner.lock();
            let slot = self.take_running(&mut inner, task_id)?;
            let now = now_ms();
            let mut events = Vec::with_capacity(2);
            let mut deadline = None;
            if slot.cancel.is_cancelled() {
                events.push(QueueEvent::Cancelled {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    was_running: true,
                });
            } else {
                deadline = inner.breaker.record_failure(now);
                events.push(QueueEvent::Failed {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    error: format!("{error:#}"),
                    consecutive_failures: inner.breaker.consecutive_failures(),
                });
                if deadline.is_some() {
                    events.push(QueueEvent::CircuitOpened {
                        at_ms: now,
                        consecutive_failures: inner.breaker.consecutive_failures(),
                        cooldown_ms: inner.breaker.cooldown_ms(),
                    });
                }
            }
            (events, deadline)
        };

        tracing::warn!(task_id = %task_id, error = %error, "failure reported");
        self.emit(&events);
        match cooldown_deadline {
            Some(deadline) => {
                tracing::warn!(
                    cooldown_ms = self.shared.config.breaker.cooldown_ms,
                    "circuit opened, admission frozen"
                );
                self.schedule_cooldown(deadline);
            }
            None => self.try_release(),
        }
        Ok(())
    }

    /// Cancel a task. A pending task is removed outright (synchronous and
    /// certain). For the running task only cancellation intent is recorded;
    /// actually interrupting the work is the executor's responsibility, and
    /// bookkeeping becomes consistent once it reports back.
    pub fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome, QueueError> {
        let (outcome, events) = {
            let mut inner = self.shared.inner.lock();
            let running_matches = inner
                .running
                .as_ref()
                .is_some_and(|slot| slot.meta.id == task_id);
            if running_matches {
                inner
                    .running
                    .as_ref()
                    .expect("slot checked above")
                    .cancel
                    .set();
                (CancelOutcome::SignalledRunning, Vec::new())
            } else {
                self.remove_pending(&mut inner, task_id)?
            }
        };

        tracing::info!(task_id = %task_id, ?outcome, "cancel requested");
        self.emit(&events);
        if outcome == CancelOutcome::Removed {
            // Removing a gate-blocked head can unblock the task behind it.
            self.try_release();
        }
        Ok(outcome)
    }

    /// Explicit external breaker reset: closes the circuit, zeroes the
    /// streak, and re-attempts release.
    pub fn reset_breaker(&self) {
        let events = {
            let mut inner = self.shared.inner.lock();
            let now = now_ms();
            if inner.breaker.reset(now) {
                vec![QueueEvent::CircuitClosed {
                    at_ms: now,
                    reason: CircuitCloseReason::ManualReset,
                }]
            } else {
                Vec::new()
            }
        };
        self.emit(&events);
        self.try_release();
    }

    /// Live queue state for UI and the metrics sampler.
    pub fn get_state(&self) -> QueueState {
        let inner = self.shared.inner.lock();
        QueueState {
            pending: inner.pending.len(),
            is_running: inner.running.is_some(),
            consecutive_failures: inner.breaker.consecutive_failures(),
            is_circuit_open: inner.breaker.is_open(now_ms()),
            resource: self.shared.gate.status(),
        }
    }

    /// Register an observer for queue events.
    pub fn subscribe(&self, observer: Arc<dyn QueueObserver>) -> SubscriptionId {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared.observers.lock().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.len();
        observers.retain(|(sub_id, _)| *sub_id != id);
        observers.len() != before
    }

    /// Attempt to release the head task into the execution slot.
    ///
    /// No-op if the slot is occupied, the circuit is open, the queue is
    /// empty, or the gate blocks the head task. Strict head-of-line: a
    /// blocked head is never skipped in favor of a smaller task further
    /// back — a deliberate policy choice favoring priority order over
    /// utilization.
    fn try_release(&self) {
        let mut events: Vec<QueueEvent> = Vec::new();
        let mut dispatch = None;
        let mut schedule_retry = false;
        {
            let mut inner = self.shared.inner.lock();
            let now = now_ms();
            if inner.running.is_some() || inner.breaker.is_open(now) {
                return;
            }
            let (head_id, head_kind, head_required) = match inner.pending.peek() {
                Some(entry) => (
                    entry.meta.id,
                    entry.meta.kind.clone(),
                    entry.meta.required_mb,
                ),
                None => return,
            };
            match self.shared.gate.check(head_required) {
                GateDecision::Block {
                    free_mb,
                    required_mb,
                } => {
                    events.push(QueueEvent::ResourceBlocked {
                        at_ms: now,
                        task_id: head_id,
                        kind: head_kind,
                        free_mb,
                        required_mb,
                    });
                    if !inner.gate_retry_scheduled {
                        inner.gate_retry_scheduled = true;
                        schedule_retry = true;
                    }
                }
                GateDecision::Admit => {
                    let entry = inner
                        .pending
                        .pop()
                        .expect("peeked entry must still be present");
                    let mut meta = entry.meta;
                    meta.started_at_ms = Some(now);
                    let cancel = CancelSignal::new();
                    events.push(QueueEvent::Released {
                        at_ms: now,
                        task_id: meta.id,
                        kind: meta.kind.clone(),
                        priority: meta.priority,
                        wait_ms: elapsed_ms(meta.enqueued_at_ms, now),
                    });
                    inner.running = Some(RunningSlot {
                        meta: meta.clone(),
                        cancel: cancel.clone(),
                    });
                    dispatch = Some((
                        ReleasedTask {
                            meta,
                            payload: entry.payload,
                        },
                        cancel,
                    ));
                }
            }
        }

        self.emit(&events);
        if schedule_retry {
            self.schedule_gate_retry();
        }
        if let Some((task, cancel)) = dispatch {
            tracing::info!(task_id = %task.meta.id, kind = %task.meta.kind, "task released");
            self.dispatch(task, cancel);
        }
    }

    /// Hand a released task to the executor under its timeout budget.
    fn dispatch(&self, task: ReleasedTask<P>, cancel: CancelSignal) {
        let queue = self.clone();
        let task_id = task.meta.id;
        let budget = Duration::from_millis(task.meta.timeout_ms);
        self.shared.spawner.spawn(async move {
            match tokio::time::timeout(budget, queue.shared.runner.run(task, cancel)).await {
                Ok(Ok(())) => {
                    if let Err(err) = queue.complete(task_id) {
                        tracing::error!(task_id = %task_id, error = %err, "completion rejected");
                    }
                }
                Ok(Err(run_err)) => {
                    if let Err(err) = queue.fail(task_id, run_err) {
                        tracing::error!(task_id = %task_id, error = %err, "failure report rejected");
                    }
                }
                Err(_) => queue.handle_timeout(task_id),
            }
        });
    }

    /// Mark the running task timed-out: failure-streak semantics under a
    /// distinct event type.
    fn handle_timeout(&self, task_id: TaskId) {
        let (events, cooldown_deadline) = {
            let mut inner = self.shared.inner.lock();
            let matches = inner
                .running
                .as_ref()
                .is_some_and(|slot| slot.meta.id == task_id);
            if !matches {
                // Already resolved out-of-band; the watchdog lost the race.
                return;
            }
            let slot = inner.running.take().expect("slot checked above");
            let now = now_ms();
            let mut events = Vec::with_capacity(2);
            let mut deadline = None;
            if slot.cancel.is_cancelled() {
                events.push(QueueEvent::Cancelled {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    was_running: true,
                });
            } else {
                deadline = inner.breaker.record_failure(now);
                events.push(QueueEvent::TimedOut {
                    at_ms: now,
                    task_id,
                    kind: slot.meta.kind,
                    timeout_ms: slot.meta.timeout_ms,
                    consecutive_failures: inner.breaker.consecutive_failures(),
                });
                if deadline.is_some() {
                    events.push(QueueEvent::CircuitOpened {
                        at_ms: now,
                        consecutive_failures: inner.breaker.consecutive_failures(),
                        cooldown_ms: inner.breaker.cooldown_ms(),
                    });
                }
            }
            (events, deadline)
        };

        tracing::warn!(task_id = %task_id, "task timed out");
        self.emit(&events);
        match cooldown_deadline {
            Some(deadline) => self.schedule_cooldown(deadline),
            None => self.try_release(),
        }
    }

    /// Arm the cool-down timer for an opened circuit. The deadline guard
    /// makes a stale timer (manual reset, later re-trip) a no-op.
    fn schedule_cooldown(&self, deadline: u128) {
        let queue = self.clone();
        // Small pad so the wake lands at or after the deadline.
        let wait = u64::try_from(deadline.saturating_sub(now_ms()))
            .unwrap_or(u64::MAX)
            .saturating_add(5);
        self.shared.spawner.spawn(async move {
            tokio::time::sleep(Duration::from_millis(wait)).await;
            queue.finish_cooldown(deadline);
        });
    }

    fn finish_cooldown(&self, deadline: u128) {
        let events = {
            let mut inner = self.shared.inner.lock();
            let now = now_ms();
            if inner.breaker.close_if_elapsed(deadline, now) {
                vec![QueueEvent::CircuitClosed {
                    at_ms: now,
                    reason: CircuitCloseReason::CooldownElapsed,
                }]
            } else {
                Vec::new()
            }
        };
        if !events.is_empty() {
            tracing::info!("circuit closed, admission resumed");
        }
        self.emit(&events);
        self.try_release();
    }

    /// Arm a single re-check for a gate-blocked head. Re-checks also fire
    /// on every enqueue and completion; this timer covers a quiet queue.
    fn schedule_gate_retry(&self) {
        let queue = self.clone();
        let wait = Duration::from_millis(self.shared.config.gate.retry_interval_ms);
        self.shared.spawner.spawn(async move {
            tokio::time::sleep(wait).await;
            queue.shared.inner.lock().gate_retry_scheduled = false;
            queue.try_release();
        });
    }

    /// Take the running slot if it matches `task_id`, or fail fast.
    fn take_running(
        &self,
        inner: &mut QueueInner<P>,
        task_id: TaskId,
    ) -> Result<RunningSlot, QueueError> {
        let matches = inner
            .running
            .as_ref()
            .is_some_and(|slot| slot.meta.id == task_id);
        if matches {
            Ok(inner.running.take().expect("slot checked above"))
        } else {
            Err(QueueError::NotRunning(task_id))
        }
    }

    /// Remove a pending task by id, rebuilding the heap without it.
    fn remove_pending(
        &self,
        inner: &mut QueueInner<P>,
        task_id: TaskId,
    ) -> Result<(CancelOutcome, Vec<QueueEvent>), QueueError> {
        let entries: Vec<_> = inner.pending.drain().collect();
        let mut removed_kind = None;
        inner.pending = entries
            .into_iter()
            .filter(|entry| {
                if entry.meta.id == task_id {
                    removed_kind = Some(entry.meta.kind.clone());
                    false
                } else {
                    true
                }
            })
            .collect();
        let kind = removed_kind.ok_or(QueueError::UnknownTask(task_id))?;
        Ok((
            CancelOutcome::Removed,
            vec![QueueEvent::Cancelled {
                at_ms: now_ms(),
                task_id,
                kind,
                was_running: false,
            }],
        ))
    }

    /// Deliver events to observers, outside the state lock, in order.
    fn emit(&self, events: &[QueueEvent]) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn QueueObserver>> = self
            .shared
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for event in events {
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }
}

fn elapsed_ms(start_ms: u128, now_ms: u128) -> u64 {
    u64::try_from(now_ms.saturating_sub(start_ms)).unwrap_or(u64::MAX)
}
