use rpcbench_core::consts::BYTES_PER_MB;
use rpcbench_core::metrics::EnvironmentInfo;
use sysinfo::System;

const UNKNOWN: &str = "unknown";

/// # Environment Info
///
/// One-shot description of the host the benchmark runs on, independent of any sampler.
pub fn environment_info() -> EnvironmentInfo {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.into());
    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_owned())
        .filter(|brand| !brand.is_empty());

    EnvironmentInfo {
        os: or_unknown(System::name()),
        os_version: or_unknown(System::os_version()),
        kernel_version: or_unknown(System::kernel_version()),
        hostname: or_unknown(System::host_name()),
        arch: std::env::consts::ARCH.into(),
        cpu_model: or_unknown(cpu_model),
        cpu_cores: system.cpus().len(),
        total_memory_mb: system.total_memory() as f64 / BYTES_PER_MB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_this_host() {
        let info = environment_info();
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert!(info.cpu_cores > 0);
        assert!(info.total_memory_mb > 0.0);
        assert!(!info.os.is_empty());
        assert!(!info.hostname.is_empty());
    }
}
