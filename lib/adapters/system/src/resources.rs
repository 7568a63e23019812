use std::path::{Path, PathBuf};

use sysinfo::{DiskExt, Pid, ProcessExt, System, SystemExt};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Process memory and CPU plus free space on the download volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
}

/// Samples the current process with `sysinfo`. CPU usage is a delta between
/// refreshes, so the first reading is zero.
pub struct ResourceSampler {
    system: System,
    pid: Option<Pid>,
    output_dir: PathBuf,
}

impl ResourceSampler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Process metrics unavailable: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn sample(&mut self) -> ResourceUsage {
        let (memory_used_mb, cpu_percent) = match self.pid {
            Some(pid) if self.system.refresh_process(pid) => self
                .system
                .process(pid)
                .map(|p| (p.memory() as f64 / BYTES_PER_MB, f64::from(p.cpu_usage())))
                .unwrap_or((0.0, 0.0)),
            _ => (0.0, 0.0),
        };

        self.system.refresh_disks_list();
        let disk_free_gb = self.free_space_gb();

        ResourceUsage {
            memory_used_mb,
            cpu_percent,
            disk_free_gb,
        }
    }

    /// Free space of the disk with the longest mount point containing the
    /// output directory. Unknown volumes report unlimited space.
    fn free_space_gb(&self) -> f64 {
        let target = self
            .output_dir
            .canonicalize()
            .unwrap_or_else(|_| self.output_dir.clone());
        self.system
            .disks()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space() as f64 / BYTES_PER_GB)
            .unwrap_or(f64::MAX)
    }
}
