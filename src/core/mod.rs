//! Scheduling core: task model, errors, breaker, gate, queue, and the
//! executor contract.

pub mod breaker;
pub mod error;
pub mod gate;
pub mod queue;
pub mod runner;
pub mod task;

pub use breaker::CircuitBreaker;
pub use error::{AppResult, QueueError};
pub use gate::{FixedProbe, GateDecision, MemoryReading, ResourceGate, ResourceProbe, ResourceStatus};
pub use queue::{AdmissionQueue, CancelOutcome, QueueObserver, QueueState, SubscriptionId};
pub use runner::TaskRunner;
pub use task::{
    CancelSignal, Priority, ReleasedTask, TaskId, TaskKind, TaskMeta, TaskSpec, TaskStatus,
};
