//! Queue observability: typed events, rolling windows, and the collector.

pub mod collector;
pub mod event;
pub mod window;

pub use collector::{hook_metrics, MetricsCollector, MetricsExport, MetricsHook, MetricsSummary, StateAccessor};
pub use event::{CircuitCloseReason, QueueEvent, QueueSnapshot};
pub use window::{DepthSummary, LatencySummary, LifetimeStats, WindowCounters, WindowReport};
