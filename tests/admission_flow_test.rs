//! Integration tests for the admission queue.
//!
//! These validate the scheduling contract end to end:
//! 1. One task runs at a time, whatever the producers do
//! 2. Priority tiers release in order, FIFO within a tier
//! 3. Failure bursts open the circuit and hold admission through cool-down
//! 4. The resource gate defers the head task without dropping it
//! 5. Timeouts and cancellations land in their own terminal states

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genqueue::config::QueueConfig;
use genqueue::core::{
    AdmissionQueue, CancelOutcome, CancelSignal, FixedProbe, Priority, QueueError, QueueObserver,
    ReleasedTask, ResourceProbe, TaskId, TaskRunner, TaskSpec,
};
use genqueue::metrics::QueueEvent;
use genqueue::runtime::TokioSpawner;

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(&'static str),
    AwaitPermit,
    Hang,
    WaitForCancel,
}

#[derive(Debug)]
struct Job {
    label: String,
    behavior: Behavior,
}

impl Job {
    fn new(label: &str, behavior: Behavior) -> Self {
        Self {
            label: label.to_owned(),
            behavior,
        }
    }
}

struct EngineState {
    order: Mutex<Vec<String>>,
    permits: tokio::sync::Semaphore,
    active: AtomicU32,
    max_active: AtomicU32,
}

/// Test executor: records release order, tracks how many tasks are inside
/// the engine at once, and follows each job's scripted behavior.
#[derive(Clone)]
struct TestEngine {
    state: Arc<EngineState>,
}

impl TestEngine {
    fn new() -> Self {
        Self {
            state: Arc::new(EngineState {
                order: Mutex::new(Vec::new()),
                permits: tokio::sync::Semaphore::new(0),
                active: AtomicU32::new(0),
                max_active: AtomicU32::new(0),
            }),
        }
    }

    fn order(&self) -> Vec<String> {
        self.state.order.lock().unwrap().clone()
    }

    fn add_permits(&self, n: usize) {
        self.state.permits.add_permits(n);
    }

    fn max_active(&self) -> u32 {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner<Job> for TestEngine {
    async fn run(&self, task: ReleasedTask<Job>, cancel: CancelSignal) -> anyhow::Result<()> {
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        self.state.order.lock().unwrap().push(task.payload.label.clone());

        let result = match task.payload.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(reason) => Err(anyhow::anyhow!(reason)),
            Behavior::AwaitPermit => {
                let permit = self
                    .state
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                permit.forget();
                Ok(())
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Ok(())
            }
        };

        self.state.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Observer capturing every emitted event.
#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<QueueEvent>>,
}

impl EventLog {
    fn snapshot(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, label: &str) -> usize {
        self.snapshot().iter().filter(|e| e.label() == label).count()
    }
}

impl QueueObserver for EventLog {
    fn on_event(&self, event: &QueueEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

type TestQueue = AdmissionQueue<Job, TestEngine, TokioSpawner>;

fn make_queue(
    config: QueueConfig,
    probe: Option<Arc<FixedProbe>>,
) -> (TestQueue, TestEngine, Arc<EventLog>) {
    let engine = TestEngine::new();
    let queue = AdmissionQueue::new(
        config,
        probe.map(|p| p as Arc<dyn ResourceProbe>),
        engine.clone(),
        TokioSpawner::current(),
    );
    let log = Arc::new(EventLog::default());
    queue.subscribe(log.clone());
    (queue, engine, log)
}

fn spec(label: &str, priority: Priority, behavior: Behavior) -> TaskSpec<Job> {
    TaskSpec::new("keyframe-image", priority, Job::new(label, behavior))
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_immediate_release_and_completion() {
    let (queue, _engine, log) = make_queue(QueueConfig::default(), None);

    queue
        .enqueue(spec("only", Priority::Normal, Behavior::Succeed))
        .expect("valid spec");
    wait_until("completion", || log.count("completed") == 1).await;

    let state = queue.get_state();
    assert_eq!(state.pending, 0);
    assert!(!state.is_running);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(log.count("enqueued"), 1);
    assert_eq!(log.count("released"), 1);
}

#[tokio::test]
async fn test_priority_release_order() {
    let (queue, engine, _log) = make_queue(QueueConfig::default(), None);

    // Occupy the slot so the next three stack up in the pending queue.
    queue
        .enqueue(spec("blocker", Priority::High, Behavior::AwaitPermit))
        .unwrap();
    wait_until("blocker start", || engine.order().len() == 1).await;

    // Enqueued low, high, normal — released high, normal, low.
    queue
        .enqueue(spec("low", Priority::Low, Behavior::AwaitPermit))
        .unwrap();
    queue
        .enqueue(spec("high", Priority::High, Behavior::AwaitPermit))
        .unwrap();
    queue
        .enqueue(spec("normal", Priority::Normal, Behavior::AwaitPermit))
        .unwrap();

    engine.add_permits(4);
    wait_until("all four ran", || engine.order().len() == 4).await;
    assert_eq!(engine.order(), vec!["blocker", "high", "normal", "low"]);
}

#[tokio::test]
async fn test_single_slot_is_never_exceeded() {
    let (queue, engine, log) = make_queue(QueueConfig::default(), None);

    for i in 0..8 {
        queue
            .enqueue(spec(&format!("task-{i}"), Priority::Normal, Behavior::AwaitPermit))
            .unwrap();
    }
    engine.add_permits(8);
    wait_until("all completions", || log.count("completed") == 8).await;

    assert_eq!(engine.max_active(), 1);
}

#[tokio::test]
async fn test_concurrent_producers_share_one_slot() {
    let (queue, engine, log) = make_queue(QueueConfig::default(), None);

    let submissions = (0..10).map(|i| {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue.enqueue(spec(&format!("p-{i}"), Priority::Normal, Behavior::Succeed))
        })
    });
    for result in futures::future::join_all(submissions).await {
        result.expect("no panic").expect("valid spec");
    }

    wait_until("all completions", || log.count("completed") == 10).await;
    assert_eq!(engine.max_active(), 1);
    assert_eq!(log.count("released"), 10);
}

#[tokio::test]
async fn test_failure_streak_opens_circuit() {
    let mut config = QueueConfig::default();
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_ms = 60_000;
    let (queue, _engine, log) = make_queue(config, None);

    for i in 0..3 {
        queue
            .enqueue(spec(&format!("doomed-{i}"), Priority::Normal, Behavior::Fail("oom")))
            .unwrap();
    }
    queue
        .enqueue(spec("held", Priority::Normal, Behavior::Succeed))
        .unwrap();

    wait_until("circuit open", || log.count("circuit_opened") == 1).await;

    let state = queue.get_state();
    assert!(state.is_circuit_open);
    assert_eq!(state.consecutive_failures, 3);
    // The fourth task does not start while the circuit is open.
    assert_eq!(state.pending, 1);
    assert!(!state.is_running);
    assert_eq!(log.count("released"), 3);

    let opened = log
        .snapshot()
        .into_iter()
        .find_map(|e| match e {
            QueueEvent::CircuitOpened {
                consecutive_failures,
                cooldown_ms,
                ..
            } => Some((consecutive_failures, cooldown_ms)),
            _ => None,
        })
        .expect("circuit-open event");
    assert_eq!(opened, (3, 60_000));
}

#[tokio::test]
async fn test_circuit_closes_after_cooldown() {
    let mut config = QueueConfig::default();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_ms = 150;
    let (queue, _engine, log) = make_queue(config, None);

    queue
        .enqueue(spec("fail-1", Priority::Normal, Behavior::Fail("oom")))
        .unwrap();
    queue
        .enqueue(spec("fail-2", Priority::Normal, Behavior::Fail("oom")))
        .unwrap();
    queue
        .enqueue(spec("held", Priority::Normal, Behavior::Succeed))
        .unwrap();

    wait_until("circuit open", || log.count("circuit_opened") == 1).await;
    wait_until("circuit closed", || log.count("circuit_closed") == 1).await;
    wait_until("held task completes", || log.count("completed") == 1).await;

    let state = queue.get_state();
    assert!(!state.is_circuit_open);
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_success_resets_streak() {
    let mut config = QueueConfig::default();
    config.breaker.failure_threshold = 3;
    let (queue, _engine, log) = make_queue(config, None);

    queue
        .enqueue(spec("fail-1", Priority::Normal, Behavior::Fail("oom")))
        .unwrap();
    queue
        .enqueue(spec("fail-2", Priority::Normal, Behavior::Fail("oom")))
        .unwrap();
    queue
        .enqueue(spec("recovers", Priority::Normal, Behavior::Succeed))
        .unwrap();

    wait_until("recovery", || log.count("completed") == 1).await;

    let state = queue.get_state();
    assert_eq!(state.consecutive_failures, 0);
    assert!(!state.is_circuit_open);
    assert_eq!(log.count("circuit_opened"), 0);
}

#[tokio::test]
async fn test_resource_gate_defers_head() {
    let mut config = QueueConfig::default();
    config.gate.retry_interval_ms = 50;
    let probe = FixedProbe::new(500, 8000);
    let (queue, _engine, log) = make_queue(config, Some(probe.clone()));

    queue
        .enqueue(
            spec("big", Priority::Normal, Behavior::Succeed).with_required_mb(800),
        )
        .unwrap();

    wait_until("gate deferral", || log.count("resource_blocked") >= 1).await;

    // Deferred, not dropped: depth unchanged, slot free.
    let state = queue.get_state();
    assert_eq!(state.pending, 1);
    assert!(!state.is_running);
    let blocked = log
        .snapshot()
        .into_iter()
        .find_map(|e| match e {
            QueueEvent::ResourceBlocked {
                free_mb,
                required_mb,
                ..
            } => Some((free_mb, required_mb)),
            _ => None,
        })
        .expect("resource-gate event");
    assert_eq!(blocked, (500, 800));

    // Memory frees up; the retry timer admits the task.
    probe.set_free_mb(4000);
    wait_until("admission after recovery", || log.count("completed") == 1).await;
    assert_eq!(queue.get_state().pending, 0);
}

#[tokio::test]
async fn test_timeout_counts_toward_streak() {
    let (queue, _engine, log) = make_queue(QueueConfig::default(), None);

    queue
        .enqueue(
            spec("stuck", Priority::Normal, Behavior::Hang).with_timeout_ms(50),
        )
        .unwrap();
    wait_until("timeout", || log.count("timed_out") == 1).await;

    let state = queue.get_state();
    assert_eq!(state.consecutive_failures, 1);
    assert!(!state.is_running);
    assert_eq!(log.count("failed"), 0);

    // A success afterwards resets the streak.
    queue
        .enqueue(spec("fine", Priority::Normal, Behavior::Succeed))
        .unwrap();
    wait_until("recovery", || log.count("completed") == 1).await;
    assert_eq!(queue.get_state().consecutive_failures, 0);
}

#[tokio::test]
async fn test_cancel_pending_is_synchronous() {
    let (queue, engine, log) = make_queue(QueueConfig::default(), None);

    queue
        .enqueue(spec("blocker", Priority::Normal, Behavior::AwaitPermit))
        .unwrap();
    wait_until("blocker start", || engine.order().len() == 1).await;
    let pending_id = queue
        .enqueue(spec("victim", Priority::Normal, Behavior::Succeed))
        .unwrap();

    let outcome = queue.cancel(pending_id).expect("pending task is known");
    assert_eq!(outcome, CancelOutcome::Removed);
    assert_eq!(queue.get_state().pending, 0);
    assert_eq!(log.count("cancelled"), 1);

    engine.add_permits(1);
    wait_until("blocker completes", || log.count("completed") == 1).await;
    // The victim never ran.
    assert_eq!(engine.order(), vec!["blocker"]);
}

#[tokio::test]
async fn test_cancel_running_records_intent() {
    let (queue, _engine, log) = make_queue(QueueConfig::default(), None);

    let id = queue
        .enqueue(spec("cooperative", Priority::Normal, Behavior::WaitForCancel))
        .unwrap();
    wait_until("release", || log.count("released") == 1).await;

    let outcome = queue.cancel(id).expect("running task is known");
    assert_eq!(outcome, CancelOutcome::SignalledRunning);

    // The executor honors the signal and reports back; bookkeeping then
    // lands in Cancelled, not Succeeded.
    wait_until("cancel terminal", || log.count("cancelled") == 1).await;
    assert_eq!(log.count("completed"), 0);
    let state = queue.get_state();
    assert!(!state.is_running);
    assert_eq!(state.consecutive_failures, 0);

    let was_running = log
        .snapshot()
        .into_iter()
        .find_map(|e| match e {
            QueueEvent::Cancelled { was_running, .. } => Some(was_running),
            _ => None,
        })
        .unwrap();
    assert!(was_running);
}

#[tokio::test]
async fn test_validation_rejects_malformed_specs() {
    let (queue, _engine, log) = make_queue(QueueConfig::default(), None);

    let no_kind = TaskSpec::new("", Priority::Normal, Job::new("x", Behavior::Succeed));
    assert!(matches!(
        queue.enqueue(no_kind),
        Err(QueueError::Validation(_))
    ));

    let zero_timeout =
        spec("x", Priority::Normal, Behavior::Succeed).with_timeout_ms(0);
    assert!(matches!(
        queue.enqueue(zero_timeout),
        Err(QueueError::Validation(_))
    ));

    // Rejected specs never entered the queue.
    assert_eq!(log.count("enqueued"), 0);
    assert_eq!(queue.get_state().pending, 0);
}

#[tokio::test]
async fn test_contract_violations_fail_fast() {
    let (queue, _engine, _log) = make_queue(QueueConfig::default(), None);

    let ghost = TaskId::new_v4();
    assert!(matches!(
        queue.complete(ghost),
        Err(QueueError::NotRunning(_))
    ));
    assert!(matches!(
        queue.fail(ghost, anyhow::anyhow!("nope")),
        Err(QueueError::NotRunning(_))
    ));
    assert!(matches!(
        queue.cancel(ghost),
        Err(QueueError::UnknownTask(_))
    ));
}

#[tokio::test]
async fn test_depth_bound_rejects_excess() {
    let mut config = QueueConfig::default();
    config.max_queue_depth = Some(1);
    let (queue, engine, log) = make_queue(config, None);

    queue
        .enqueue(spec("blocker", Priority::Normal, Behavior::AwaitPermit))
        .unwrap();
    wait_until("blocker start", || engine.order().len() == 1).await;

    queue
        .enqueue(spec("fits", Priority::Normal, Behavior::Succeed))
        .unwrap();
    assert!(matches!(
        queue.enqueue(spec("overflow", Priority::Normal, Behavior::Succeed)),
        Err(QueueError::QueueFull(1))
    ));

    engine.add_permits(1);
    wait_until("drain", || log.count("completed") == 2).await;
}

#[tokio::test]
async fn test_manual_breaker_reset_resumes_admission() {
    let mut config = QueueConfig::default();
    config.breaker.failure_threshold = 1;
    config.breaker.cooldown_ms = 60_000;
    let (queue, _engine, log) = make_queue(config, None);

    queue
        .enqueue(spec("doomed", Priority::Normal, Behavior::Fail("oom")))
        .unwrap();
    queue
        .enqueue(spec("held", Priority::Normal, Behavior::Succeed))
        .unwrap();
    wait_until("circuit open", || log.count("circuit_opened") == 1).await;
    assert_eq!(queue.get_state().pending, 1);

    queue.reset_breaker();
    wait_until("held task completes", || log.count("completed") == 1).await;
    assert_eq!(log.count("circuit_closed"), 1);
    assert!(!queue.get_state().is_circuit_open);
}
