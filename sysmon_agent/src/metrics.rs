//! Host CPU utilization using sysinfo.

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::warn;

/// Percentage-utilization samples, measured since the previous call.
pub trait CpuSource: Send {
    fn core_count(&self) -> usize;
    fn per_core(&mut self) -> Vec<f32>;
    fn overall(&mut self) -> f32;
}

pub struct SysinfoCpu {
    sys: System,
}

impl SysinfoCpu {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage());
        let mut sys = System::new_with_specifics(refresh_kind);
        // Baseline; the first real sample is relative to this.
        sys.refresh_cpu_usage();
        Self { sys }
    }

    fn refresh(&mut self) {
        let sys = &mut self.sys;
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sys.refresh_cpu_usage();
        })) {
            warn!("sysinfo cpu refresh panicked: {e:?}");
        }
    }
}

impl Default for SysinfoCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSource for SysinfoCpu {
    fn core_count(&self) -> usize {
        self.sys.cpus().len().max(1)
    }

    fn per_core(&mut self) -> Vec<f32> {
        self.refresh();
        self.sys.cpus().iter().map(|c| c.cpu_usage()).collect()
    }

    fn overall(&mut self) -> f32 {
        self.refresh();
        self.sys.global_cpu_usage()
    }
}

/// Fixed readings, for tests and for hosts where sysinfo is unwanted.
#[derive(Debug, Clone)]
pub struct StaticCpu {
    pub cores: Vec<f32>,
}

impl CpuSource for StaticCpu {
    fn core_count(&self) -> usize {
        self.cores.len()
    }

    fn per_core(&mut self) -> Vec<f32> {
        self.cores.clone()
    }

    fn overall(&mut self) -> f32 {
        if self.cores.is_empty() {
            return 0.0;
        }
        self.cores.iter().sum::<f32>() / self.cores.len() as f32
    }
}
