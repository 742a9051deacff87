//! Local metric collectors (`sysinfo`).

use metricsd_domain::{Metric, MetricName};
use metricsd_ports::MetricCollectorPort;
use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use rand::Rng;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, System};

/// Name of the counter incremented once per runtime poll.
pub const POLL_COUNT: &str = "PollCount";
/// Name of the random gauge sampled once per runtime poll.
pub const RANDOM_VALUE: &str = "RandomValue";

fn name(raw: &str) -> Result<MetricName> {
    MetricName::parse(raw).map_err(ErrorEnvelope::from)
}

/// Current process metrics plus `RandomValue` and `PollCount`.
#[derive(Debug)]
pub struct RuntimeCollector {
    pid: Pid,
    system: Mutex<System>,
}

impl RuntimeCollector {
    /// Collector for the calling process.
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::new("agent", "collector_init_failed"),
                format!("cannot resolve current pid: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;
        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl MetricCollectorPort for RuntimeCollector {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn collect(&self) -> Result<Vec<Metric>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_process(self.pid);

        let mut metrics = Vec::with_capacity(6);
        if let Some(process) = system.process(self.pid) {
            metrics.push(Metric::gauge(name("ResidentMemory")?, process.memory() as f64));
            metrics.push(Metric::gauge(
                name("VirtualMemory")?,
                process.virtual_memory() as f64,
            ));
            metrics.push(Metric::gauge(
                name("ProcessCPUPercent")?,
                f64::from(process.cpu_usage()),
            ));
            metrics.push(Metric::gauge(name("Uptime")?, process.run_time() as f64));
        }
        metrics.push(Metric::gauge(
            name(RANDOM_VALUE)?,
            rand::thread_rng().gen_range(0.0..1.0),
        ));
        metrics.push(Metric::counter(name(POLL_COUNT)?, 1));
        Ok(metrics)
    }
}

/// Host memory and per-CPU utilization.
#[derive(Debug)]
pub struct SystemCollector {
    system: Mutex<System>,
}

impl SystemCollector {
    /// Collector over a fresh `sysinfo` handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollectorPort for SystemCollector {
    fn name(&self) -> &'static str {
        "system"
    }

    fn collect(&self) -> Result<Vec<Metric>> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        system.refresh_cpu();

        let mut metrics = vec![
            Metric::gauge(name("TotalMemory")?, system.total_memory() as f64),
            Metric::gauge(name("FreeMemory")?, system.free_memory() as f64),
        ];
        for (index, cpu) in system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                name(&format!("CPUutilization{}", index + 1))?,
                f64::from(cpu.cpu_usage()),
            ));
        }
        Ok(metrics)
    }
}
