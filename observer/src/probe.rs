//! OS and process introspection used by the resource sampler.

use sysinfo::{Networks, Pid, ProcessesToUpdate, System};
use tokio::runtime::Handle;

use rpcbench_core::consts::BYTES_PER_MB;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MemoryReading {
    pub used_mb: f64,
    pub percent: f64,
}

/// Cumulative network byte counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetworkTotals {
    pub sent: u64,
    pub received: u64,
}

/// Cumulative disk byte counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DiskTotals {
    pub read: u64,
    pub written: u64,
}

/// # Resource Probe
///
/// Source of raw resource readings. Every reader returns `None` when the underlying
/// counter could not be read, the sampler then keeps the previous value.
pub trait ResourceProbe: Send + 'static {
    /// Called once before each round of reads.
    fn refresh(&mut self) {}
    fn cpu_percent(&mut self) -> Option<f64>;
    fn memory(&mut self) -> Option<MemoryReading>;
    fn network_totals(&mut self) -> Option<NetworkTotals>;
    fn disk_totals(&mut self) -> Option<DiskTotals>;
    fn open_connections(&mut self) -> Option<u64>;
    fn concurrent_tasks(&mut self) -> Option<u64>;
}

/// # Sysinfo Probe
///
/// Reads the current process through `sysinfo`, falling back to host-wide figures when
/// the process cannot be inspected.
pub struct SysinfoProbe {
    system: System,
    pid: Option<Pid>,
    runtime: Option<Handle>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|err| tracing::warn!(%err, "current process is not inspectable"))
            .ok();
        let mut probe = Self {
            system: System::new(),
            pid,
            runtime: Handle::try_current().ok(),
        };
        // cpu usage is computed between two refreshes, prime the first one
        probe.refresh();
        probe
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn refresh(&mut self) {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }
    }

    fn cpu_percent(&mut self) -> Option<f64> {
        let process = self.pid.and_then(|pid| self.system.process(pid));
        let usage = match process {
            Some(process) => process.cpu_usage(),
            None => self.system.global_cpu_usage(),
        };
        Some(usage as f64).filter(|u| u.is_finite())
    }

    fn memory(&mut self) -> Option<MemoryReading> {
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        let used = match self.pid.and_then(|pid| self.system.process(pid)) {
            Some(process) => process.memory(),
            None => self.system.used_memory(),
        };
        Some(MemoryReading {
            used_mb: used as f64 / BYTES_PER_MB,
            percent: used as f64 / total as f64 * 100.0,
        })
    }

    fn network_totals(&mut self) -> Option<NetworkTotals> {
        let networks = Networks::new_with_refreshed_list();
        let totals = networks
            .iter()
            .fold(NetworkTotals::default(), |acc, (_, data)| NetworkTotals {
                sent: acc.sent + data.total_transmitted(),
                received: acc.received + data.total_received(),
            });
        Some(totals)
    }

    fn disk_totals(&mut self) -> Option<DiskTotals> {
        let process = self.system.process(self.pid?)?;
        let usage = process.disk_usage();
        Some(DiskTotals {
            read: usage.total_read_bytes,
            written: usage.total_written_bytes,
        })
    }

    fn open_connections(&mut self) -> Option<u64> {
        open_sockets()
    }

    fn concurrent_tasks(&mut self) -> Option<u64> {
        if let Some(runtime) = &self.runtime {
            return Some(runtime.metrics().num_alive_tasks() as u64);
        }
        let process = self.system.process(self.pid?)?;
        process.tasks().map(|tasks| tasks.len() as u64)
    }
}

/// Number of socket descriptors held by this process.
#[cfg(target_os = "linux")]
fn open_sockets() -> Option<u64> {
    let fds = std::fs::read_dir("/proc/self/fd").ok()?;
    let sockets = fds
        .filter_map(Result::ok)
        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
        .filter(|target| target.to_string_lossy().starts_with("socket:"))
        .count();
    Some(sockets as u64)
}

#[cfg(not(target_os = "linux"))]
fn open_sockets() -> Option<u64> {
    None
}
