//! Monitoring
//!
//! Worker health reporting and Prometheus export of buffer counters.

mod exporter;
mod health;

pub use exporter::MetricsExporter;
pub use health::{
    HealthCheckResult, HealthResponse, HealthStatus, WorkerHealth, DEFAULT_FAILURE_THRESHOLD,
};
