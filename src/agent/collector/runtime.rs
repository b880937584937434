//! In-process runtime metrics: heap counters, process memory and scheduler
//! state, plus the `RandomValue` gauge and `PollCount` counter.

use std::time::Duration;

use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::agent::collector::{Collector, CollectorError};
use crate::agent::registry::RegistryGuard;
use crate::alloc::TrackingAllocator;

/// Counter incremented once per successful cycle.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge holding a fresh random sample each cycle.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Samples the agent process itself.
pub struct RuntimeCollector {
    interval: Duration,
    allocator: Option<&'static TrackingAllocator>,
    system: System,
    pid: Option<Pid>,
}

impl std::fmt::Debug for RuntimeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCollector")
            .field("interval", &self.interval)
            .field("allocator", &self.allocator.is_some())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl RuntimeCollector {
    pub fn new(interval: Duration) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Current pid unavailable, process gauges disabled");
                None
            }
        };
        Self {
            interval,
            allocator: None,
            system: System::new(),
            pid,
        }
    }

    /// Report heap gauges from the installed global allocator.
    ///
    /// Without one, the heap gauges (`Alloc`, `HeapAlloc`, ...) are omitted.
    pub fn with_allocator(mut self, allocator: &'static TrackingAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    fn collect_heap(&self, metrics: &mut RegistryGuard<'_>) {
        let Some(allocator) = self.allocator else {
            return;
        };
        let stats = allocator.stats();
        metrics.set_gauge("Alloc", stats.live_bytes as f64);
        metrics.set_gauge("HeapAlloc", stats.live_bytes as f64);
        metrics.set_gauge("TotalAlloc", stats.total_bytes as f64);
        metrics.set_gauge("Mallocs", stats.allocations as f64);
        metrics.set_gauge("Frees", stats.deallocations as f64);
        metrics.set_gauge("HeapObjects", stats.live_objects() as f64);
    }

    fn collect_process(&mut self, metrics: &mut RegistryGuard<'_>) {
        let Some(pid) = self.pid else {
            return;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = self.system.process(pid) {
            metrics.set_gauge("Sys", process.memory() as f64);
            metrics.set_gauge("VirtualMemory", process.virtual_memory() as f64);
        }
    }

    fn collect_scheduler(metrics: &mut RegistryGuard<'_>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let runtime = handle.metrics();
        metrics.set_gauge("NumWorkers", runtime.num_workers() as f64);
        metrics.set_gauge("NumAliveTasks", runtime.num_alive_tasks() as f64);
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, metrics: &mut RegistryGuard<'_>) -> Result<(), CollectorError> {
        self.collect_heap(metrics);
        self.collect_process(metrics);
        Self::collect_scheduler(metrics);

        metrics.set_gauge(RANDOM_VALUE, rand::thread_rng().r#gen::<f64>());
        metrics.inc_counter(POLL_COUNT, 1)?;
        Ok(())
    }
}
