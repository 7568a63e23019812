//! Port traits the control plane consumes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use civitai_dl_domain::{OperationRequest, OperationStatus, SystemSample};

/// Point-in-time system resource sample.
#[async_trait]
pub trait MetricsPort: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<SystemSample>;
}

/// Executes a single unit of work (API call, model or image download).
///
/// Implementations report failures through the returned status and never
/// retry on behalf of the caller.
#[async_trait]
pub trait OperationPort: Send + Sync {
    async fn execute(&self, request: &OperationRequest) -> OperationStatus;
}

/// Millisecond wall clock. Injected so time-gated rules can be tested.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct PortSet {
    pub metrics: Arc<dyn MetricsPort>,
    pub operations: Arc<dyn OperationPort>,
    pub clock: Arc<dyn Clock>,
}

impl PortSet {
    pub fn empty() -> Self {
        Self {
            metrics: Arc::new(NullMetricsPort),
            operations: Arc::new(NullOperationPort),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsPort>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_operations(mut self, operations: Arc<dyn OperationPort>) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Clone, Default)]
struct NullMetricsPort;

#[async_trait]
impl MetricsPort for NullMetricsPort {
    async fn fetch_snapshot(&self) -> Result<SystemSample> {
        Ok(SystemSample::default())
    }
}

#[derive(Clone, Default)]
struct NullOperationPort;

#[async_trait]
impl OperationPort for NullOperationPort {
    async fn execute(&self, _request: &OperationRequest) -> OperationStatus {
        OperationStatus::Success
    }
}
