//! # Genqueue
//!
//! Admission control and execution scheduling for a single, memory-constrained
//! compute accelerator that runs exactly one AI-generation job at a time.
//!
//! This library is the layer between many producers of generation requests
//! and one expensive accelerator: it accepts requests, orders them fairly,
//! protects the device from overcommitment, recovers from bursts of failure
//! without wedging, and exposes rolling telemetry about queue health.
//!
//! ## Core Problem Solved
//!
//! Generation workloads on a single accelerator behave differently from
//! typical web-service work:
//!
//! - **One slot**: the device runs one job at a time; admission is a gate,
//!   not a worker pool
//! - **VRAM limits**: releasing a job the device cannot fit wedges everything
//!   behind it
//! - **Failure bursts**: an accelerator stuck out-of-memory fails every job
//!   thrown at it; retrying blindly wastes the queue
//! - **Always-on telemetry**: queue health must be observable continuously
//!   without unbounded memory growth
//!
//! ## Key Features
//!
//! - **Priority admission**: three tiers, FIFO within a tier, strict
//!   head-of-line release
//! - **Circuit breaker**: a consecutive-failure streak freezes admission for
//!   a cool-down instead of hammering an unhealthy executor
//! - **Resource gate**: live free-memory readings checked against each
//!   task's declared requirement before release
//! - **Rolling metrics**: exact counters and latency percentiles over
//!   bounded observation windows, plus lifetime totals
//! - **Disciplined observation**: the collector subscribes and samples; it
//!   never mutates the queue it watches
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genqueue::config::GatekeeperConfig;
//! use genqueue::core::{AdmissionQueue, Priority, TaskSpec};
//! use genqueue::metrics::{hook_metrics, MetricsCollector};
//! use genqueue::runtime::TokioSpawner;
//!
//! let config = GatekeeperConfig::default();
//! let queue = AdmissionQueue::new(
//!     config.queue,
//!     Some(probe),      // implements ResourceProbe
//!     engine,           // implements TaskRunner<Job>
//!     TokioSpawner::current(),
//! );
//! let collector = MetricsCollector::new(config.metrics);
//! let hook = hook_metrics(&queue, &collector);
//!
//! let id = queue.enqueue(TaskSpec::new("keyframe-image", Priority::High, job))?;
//! // ... later
//! let summary = collector.summary();
//! hook.teardown();
//! ```
//!
//! For complete examples, see the integration tests in `tests/`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling core: task model, errors, queue, breaker, gate, executor seam.
pub mod core;
/// Configuration models for the queue and the metrics collector.
pub mod config;
/// Typed events, rolling windows, and the metrics collector.
pub mod metrics;
/// Runtime adapters (spawn seam, Tokio implementation).
pub mod runtime;
/// Shared utilities.
pub mod util;
