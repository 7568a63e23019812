//! Live metrics source: process resources via `sysinfo`, API health via `reqwest`.

pub mod probe;
pub mod resources;

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use civitai_dl_domain::SystemSample;
use civitai_dl_ports::MetricsPort;

pub use probe::{ApiProbe, UNREACHABLE_LATENCY_MS};
pub use resources::{ResourceSampler, ResourceUsage};

pub struct SystemMetrics {
    sampler: Mutex<ResourceSampler>,
    probe: ApiProbe,
}

impl SystemMetrics {
    pub fn new(output_dir: impl Into<PathBuf>, probe: ApiProbe) -> Self {
        Self {
            sampler: Mutex::new(ResourceSampler::new(output_dir)),
            probe,
        }
    }

    fn resources(&self) -> ResourceUsage {
        self.sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    }
}

#[async_trait]
impl MetricsPort for SystemMetrics {
    async fn fetch_snapshot(&self) -> Result<SystemSample> {
        let usage = self.resources();
        let (network_latency_ms, api_reachable) =
            tokio::join!(self.probe.measure_latency(), self.probe.check_connectivity());
        tracing::debug!(
            memory_mb = usage.memory_used_mb,
            cpu = usage.cpu_percent,
            disk_free_gb = usage.disk_free_gb,
            latency_ms = network_latency_ms,
            api_reachable,
            "system sample collected"
        );
        Ok(SystemSample {
            memory_used_mb: usage.memory_used_mb,
            cpu_percent: usage.cpu_percent,
            disk_free_gb: usage.disk_free_gb,
            network_latency_ms,
            api_reachable,
        })
    }
}
