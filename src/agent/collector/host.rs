//! Host metrics from the operating system.

use std::time::Duration;

use sysinfo::System;

use crate::agent::collector::{Collector, CollectorError};
use crate::agent::registry::RegistryGuard;

/// Samples total/free memory and per-core CPU utilization.
///
/// CPU usage is computed between two refreshes, so the first cycle reports
/// zero for every core.
pub struct HostCollector {
    interval: Duration,
    system: System,
}

impl std::fmt::Debug for HostCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCollector")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl HostCollector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            system: System::new(),
        }
    }
}

/// Registry name for core `index` (zero-based); names are 1-based.
pub fn cpu_metric_name(index: usize) -> String {
    format!("CPUutilization{}", index + 1)
}

impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, metrics: &mut RegistryGuard<'_>) -> Result<(), CollectorError> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectorError::Source("memory totals unavailable".into()));
        }
        metrics.set_gauge("TotalMemory", total as f64);
        metrics.set_gauge("FreeMemory", self.system.free_memory() as f64);

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.set_gauge(&cpu_metric_name(i), f64::from(cpu.cpu_usage()));
        }
        Ok(())
    }
}
