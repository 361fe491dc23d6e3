use std::time::Duration;

/// Directory where run reports are written and read back by the assist tool.
pub const RUNS_OUTPUT_PATH: &str = "runs";

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted resource sampling interval.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Seed for per-method minimum latency, larger than any real observation.
pub const MIN_LATENCY_SENTINEL: f64 = 1e18;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
