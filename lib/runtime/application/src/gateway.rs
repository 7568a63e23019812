use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::interval;

use civitai_dl_domain::{
    ControlConfig, OperationClass, OperationOutcome, OperationRequest, OperationStatus,
    StatusReport,
};
use civitai_dl_ports::PortSet;

use crate::control::{ControlPlane, HealthCheck};
use crate::pool::WorkerPool;

/// Tally of one `run_batch` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub class: OperationClass,
    pub effective_limit: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl BatchReport {
    fn new(class: OperationClass, effective_limit: usize) -> Self {
        Self {
            class,
            effective_limit,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
        }
    }

    fn tally(&mut self, status: &OperationStatus) {
        match status {
            OperationStatus::Success => self.succeeded += 1,
            OperationStatus::Failure { .. } => self.failed += 1,
            OperationStatus::Timeout => self.timed_out += 1,
        }
    }
}

/// The only component that talks to collaborators. Sizes a pool per class
/// from the control plane, dispatches, and feeds every outcome back.
pub struct ExecutionGateway {
    control: Arc<ControlPlane>,
    ports: PortSet,
    pools: Mutex<BTreeMap<OperationClass, WorkerPool>>,
}

impl ExecutionGateway {
    pub fn new(config: ControlConfig, ports: PortSet) -> Result<Self> {
        let control = ControlPlane::new(config, ports.clock.clone())?;
        Ok(Self::with_control(Arc::new(control), ports))
    }

    pub fn with_control(control: Arc<ControlPlane>, ports: PortSet) -> Self {
        Self {
            control,
            ports,
            pools: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    pub fn status_report(&self) -> StatusReport {
        self.control.status_report()
    }

    /// Runs `requests` with at most `effective_limit(class)` in flight. The
    /// limit is read once per batch; new work stops once emergency stop is
    /// reached while in-flight work finishes.
    pub async fn run_batch(
        &self,
        class: OperationClass,
        requests: Vec<OperationRequest>,
    ) -> Result<BatchReport> {
        let limit = self.control.effective_limit(class);
        let mut report = BatchReport::new(class, limit);
        if limit == 0 {
            report.skipped = requests.len();
            tracing::warn!(class = %class, skipped = report.skipped, "emergency stop, batch not dispatched");
            return Ok(report);
        }

        let pool = self.pool_for(class, limit);
        let mut tasks = JoinSet::new();
        let mut pending = requests.into_iter();

        while let Some(request) = pending.next() {
            if self.control.current_restrictions().emergency_stop {
                report.skipped = 1 + pending.len();
                tracing::warn!(class = %class, skipped = report.skipped, "emergency stop reached mid-batch");
                break;
            }
            let permit = pool.acquire().await?;
            if self.control.current_restrictions().emergency_stop {
                drop(permit);
                report.skipped = 1 + pending.len();
                tracing::warn!(class = %class, skipped = report.skipped, "emergency stop reached mid-batch");
                break;
            }

            report.dispatched += 1;
            let control = self.control.clone();
            let operations = self.ports.operations.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let status = operations.execute(&request).await;
                let outcome = OperationOutcome::from_status(
                    request.class,
                    &status,
                    started.elapsed(),
                    control.now_millis(),
                );
                let details = match &status {
                    OperationStatus::Failure { category, reason } => json!({
                        "class": request.class,
                        "target": request.target,
                        "category": category,
                        "reason": reason,
                    }),
                    _ => json!({
                        "class": request.class,
                        "target": request.target,
                        "timed_out": outcome.timed_out,
                    }),
                };
                control.record_outcome_with_details(outcome, details);
                status
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(status) => report.tally(&status),
                Err(e) => {
                    tracing::error!("Operation task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            class = %report.class,
            limit = report.effective_limit,
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }

    /// Samples the metrics port (bounded by the probe timeout) and runs the
    /// sample through the control plane. A slow or failing probe counts as
    /// the API being unreachable.
    pub async fn health_check(&self) -> HealthCheck {
        let timeout = self.control.config().gateway.probe_timeout();
        let check = match tokio::time::timeout(timeout, self.ports.metrics.fetch_snapshot()).await {
            Ok(Ok(sample)) => self.control.observe_sample(sample),
            Ok(Err(e)) => {
                tracing::error!("Metrics probe failed: {}", e);
                self.control.observe_failed_sample()
            }
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "metrics probe timed out");
                self.control.observe_failed_sample()
            }
        };
        tracing::debug!(
            level = %check.assessment.level,
            score = check.assessment.score,
            alerts = check.alerts.len(),
            "health check complete"
        );
        check
    }

    /// Health check plus a recovery poll on every tick. Runs until the task
    /// is dropped.
    pub async fn run_health_loop(&self) {
        let mut timer = interval(self.control.config().gateway.health_check_interval());
        loop {
            timer.tick().await;
            let check = self.health_check().await;
            if check.level_change.is_none() {
                self.control.poll();
            }
        }
    }

    fn pool_for(&self, class: OperationClass, limit: usize) -> WorkerPool {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pools
            .entry(class)
            .or_insert_with(|| WorkerPool::new(limit))
            .clone();
        pool.resize(limit);
        pool
    }

    #[cfg(test)]
    pub(crate) fn pool_capacity(&self, class: OperationClass) -> Option<usize> {
        let pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools.get(&class).map(WorkerPool::capacity)
    }
}
