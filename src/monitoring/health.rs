//! Health Checks
//!
//! Worker liveness and processing health for the management surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Consecutive processing failures before the worker reports degraded
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating, but prefetching is failing or lagging
    Degraded,
    /// Not operating
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Outcome of one named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Health report for the management surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across checks
    pub status: HealthStatus,
    /// Whether the background worker is draining the queue
    pub worker_running: bool,
    /// Last time the worker cached a processed chunk
    pub last_success: Option<DateTime<Utc>>,
    /// Last time the processor failed
    pub last_failure: Option<DateTime<Utc>>,
    /// Work items waiting in the queue
    pub pending_work: usize,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Shared health state written by the worker and read by operators
pub struct WorkerHealth {
    start_time: Instant,
    running: AtomicBool,
    consecutive_failures: AtomicU64,
    failure_threshold: u64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_failure: Mutex<Option<DateTime<Utc>>>,
}

impl WorkerHealth {
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    /// Report degraded after `threshold` consecutive failures
    pub fn with_failure_threshold(threshold: u64) -> Self {
        Self {
            start_time: Instant::now(),
            running: AtomicBool::new(false),
            consecutive_failures: AtomicU64::new(0),
            failure_threshold: threshold.max(1),
            last_success: Mutex::new(None),
            last_failure: Mutex::new(None),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// A chunk was processed and cached
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success.lock() = Some(Utc::now());
    }

    /// The processor failed for a chunk
    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Utc::now());
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        *self.last_failure.lock()
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn worker_check(&self) -> HealthCheckResult {
        if self.is_running() {
            HealthCheckResult::healthy("worker")
        } else {
            HealthCheckResult::unhealthy("worker", "Worker is stopped")
        }
    }

    fn processing_check(&self) -> HealthCheckResult {
        let failures = self.consecutive_failures();
        if failures >= self.failure_threshold {
            HealthCheckResult::degraded(
                "processing",
                format!("{} consecutive processing failures", failures),
            )
        } else {
            HealthCheckResult::healthy("processing")
        }
    }

    /// Build the health report
    pub fn report(&self, pending_work: usize) -> HealthResponse {
        let checks = vec![self.worker_check(), self.processing_check()];
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthResponse {
            status,
            worker_running: self.is_running(),
            last_success: self.last_success(),
            last_failure: self.last_failure(),
            pending_work,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }
}

impl Default for WorkerHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHealth")
            .field("running", &self.is_running())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
