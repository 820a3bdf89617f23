//! Queue and collector configuration structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::task::TaskKind;

/// Circuit-breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long admission stays frozen once opened, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Resource-gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Per-kind accelerator-memory requirements in MB. A kind with no entry
    /// (and no per-task override) requires 0 MB and always admits.
    pub requirements_mb: HashMap<TaskKind, u64>,
    /// Headroom kept free on top of per-task requirements, in MB.
    pub reserve_mb: u64,
    /// How long to wait before re-checking a gate-blocked head task, in
    /// milliseconds. Re-checks also fire on every enqueue and completion.
    pub retry_interval_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            requirements_mb: HashMap::new(),
            reserve_mb: 0,
            retry_interval_ms: 5_000,
        }
    }
}

/// Admission-queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Circuit-breaker settings.
    pub breaker: BreakerConfig,
    /// Resource-gate settings.
    pub gate: GateConfig,
    /// Timeout budget for tasks that do not declare one, in milliseconds.
    pub default_timeout_ms: u64,
    /// Optional bound on pending depth; `None` means unbounded.
    pub max_queue_depth: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            gate: GateConfig::default(),
            default_timeout_ms: 300_000,
            max_queue_depth: None,
        }
    }
}

/// Metrics-collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Observation-window duration in milliseconds.
    pub window_ms: u64,
    /// Interval between queue-state snapshots in milliseconds.
    pub snapshot_interval_ms: u64,
    /// How many finalized windows to retain, oldest evicted first.
    pub history_limit: usize,
    /// Capacity of the per-window event ring buffer (inspection only).
    pub event_buffer: usize,
    /// Capacity of the per-window snapshot ring buffer (inspection only).
    pub snapshot_buffer: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            snapshot_interval_ms: 5_000,
            history_limit: 12,
            event_buffer: 500,
            snapshot_buffer: 60,
        }
    }
}

/// Root configuration composing the queue and the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Admission-queue settings.
    pub queue: QueueConfig,
    /// Metrics-collector settings.
    pub metrics: MetricsConfig,
}

impl QueueConfig {
    /// Validate queue configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.breaker.failure_threshold == 0 {
            return Err("breaker.failure_threshold must be greater than 0".into());
        }
        if self.breaker.cooldown_ms == 0 {
            return Err("breaker.cooldown_ms must be greater than 0".into());
        }
        if self.gate.retry_interval_ms == 0 {
            return Err("gate.retry_interval_ms must be greater than 0".into());
        }
        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be greater than 0".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0 when set".into());
        }
        Ok(())
    }
}

impl MetricsConfig {
    /// Validate collector configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_ms == 0 {
            return Err("window_ms must be greater than 0".into());
        }
        if self.snapshot_interval_ms == 0 {
            return Err("snapshot_interval_ms must be greater than 0".into());
        }
        if self.snapshot_interval_ms > self.window_ms {
            return Err("snapshot_interval_ms must not exceed window_ms".into());
        }
        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".into());
        }
        if self.event_buffer == 0 || self.snapshot_buffer == 0 {
            return Err("ring buffer capacities must be greater than 0".into());
        }
        Ok(())
    }
}

impl GatekeeperConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.queue
            .validate()
            .map_err(|e| format!("queue invalid: {e}"))?;
        self.metrics
            .validate()
            .map_err(|e| format!("metrics invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: GatekeeperConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
