//! Configuration models for the queue, breaker, gate, and metrics collector.

pub mod scheduler;

pub use scheduler::{BreakerConfig, GateConfig, GatekeeperConfig, MetricsConfig, QueueConfig};
