use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Derived view over an outcome window. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub count: usize,
    pub successes: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub success_rate: f64,
    pub timeout_rate: f64,
    pub mean_duration: Duration,
    /// Outcomes recorded within the trailing 60 seconds.
    pub throughput_per_minute: usize,
}

impl Default for AggregateMetrics {
    fn default() -> Self {
        Self {
            count: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            success_rate: 1.0,
            timeout_rate: 0.0,
            mean_duration: Duration::ZERO,
            throughput_per_minute: 0,
        }
    }
}

impl AggregateMetrics {
    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate
    }
}

/// Point-in-time resource sample supplied by a metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
    pub network_latency_ms: f64,
    pub api_reachable: bool,
}

impl Default for SystemSample {
    fn default() -> Self {
        Self {
            memory_used_mb: 0.0,
            cpu_percent: 0.0,
            disk_free_gb: f64::MAX,
            network_latency_ms: 0.0,
            api_reachable: true,
        }
    }
}

/// Resource sample joined with the reliability view of the outcome window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
    pub network_latency_ms: f64,
    pub api_reachable: bool,
    pub success_rate: f64,
    pub timeout_rate: f64,
    pub error_rate: f64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::from_sample(SystemSample::default())
    }
}

impl MetricsSnapshot {
    pub fn from_sample(sample: SystemSample) -> Self {
        Self {
            memory_used_mb: sample.memory_used_mb,
            cpu_percent: sample.cpu_percent,
            disk_free_gb: sample.disk_free_gb,
            network_latency_ms: sample.network_latency_ms,
            api_reachable: sample.api_reachable,
            success_rate: 1.0,
            timeout_rate: 0.0,
            error_rate: 0.0,
        }
    }

    pub fn with_reliability(mut self, aggregates: &AggregateMetrics) -> Self {
        self.success_rate = aggregates.success_rate;
        self.timeout_rate = aggregates.timeout_rate;
        self.error_rate = aggregates.error_rate();
        self
    }

    pub fn system(&self) -> SystemSample {
        SystemSample {
            memory_used_mb: self.memory_used_mb,
            cpu_percent: self.cpu_percent,
            disk_free_gb: self.disk_free_gb,
            network_latency_ms: self.network_latency_ms,
            api_reachable: self.api_reachable,
        }
    }
}
