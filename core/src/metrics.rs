use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    consts::MIN_LATENCY_SENTINEL,
    stats::{self, Outlier},
};

/// One of the pre-aggregated latency indicators of the request duration family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Avg,
    Min,
    Med,
    Max,
    P90,
    P95,
    P99,
}

impl Indicator {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let indicator = match suffix {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "med" => Self::Med,
            "max" => Self::Max,
            "p90" => Self::P90,
            "p95" => Self::P95,
            "p99" => Self::P99,
            _ => return None,
        };
        Some(indicator)
    }
}

/// # Metric Summary
///
/// Latency and request-count summary for one method, or rolled up for a whole client.
/// Rates are percentages and are always derived from the counts.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MetricSummary {
    pub count: u64,
    pub error_count: u64,
    pub success_count: u64,
    pub error_rate: f64,
    pub success_rate: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub coeff_var: f64,
    pub throughput: f64,
}

impl Default for MetricSummary {
    fn default() -> Self {
        Self {
            count: 0,
            error_count: 0,
            success_count: 0,
            error_rate: 0.0,
            success_rate: 0.0,
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            p50: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
            std_dev: 0.0,
            coeff_var: 0.0,
            throughput: 0.0,
        }
    }
}

impl MetricSummary {
    /// A fresh accumulator: `min` starts at a sentinel so the first observed minimum
    /// always replaces it.
    pub fn seeded() -> Self {
        Self {
            min: MIN_LATENCY_SENTINEL,
            ..Default::default()
        }
    }

    #[inline]
    fn has_min(&self) -> bool {
        self.min < MIN_LATENCY_SENTINEL
    }

    /// Whether any latency indicator has been recorded.
    pub fn has_latency(&self) -> bool {
        self.has_min() || self.max > 0.0 || self.avg > 0.0
    }

    /// Adds `requests` to the counters and re-derives both rates from them.
    pub fn record_requests(&mut self, requests: u64, failed: bool) {
        self.count += requests;
        if failed {
            self.error_count += requests;
        } else {
            self.success_count += requests;
        }
        self.recompute_rates();
    }

    pub fn recompute_rates(&mut self) {
        if self.count == 0 {
            self.error_rate = 0.0;
            self.success_rate = 0.0;
            return;
        }
        let count = self.count as f64;
        self.error_rate = (self.error_count as f64 / count * 100.0).clamp(0.0, 100.0);
        self.success_rate = (self.success_count as f64 / count * 100.0).clamp(0.0, 100.0);
    }

    /// Stores one latency indicator (milliseconds). Indicators may arrive in any order,
    /// dispersion fields are refreshed after every update.
    pub fn record_indicator(&mut self, indicator: Indicator, millis: f64) {
        match indicator {
            Indicator::Avg => self.avg = millis,
            Indicator::Min => self.min = millis,
            Indicator::Med => self.p50 = millis,
            Indicator::Max => self.max = millis,
            Indicator::P90 => self.p90 = millis,
            Indicator::P95 => self.p95 = millis,
            Indicator::P99 => self.p99 = millis,
        }
        self.refresh_dispersion();
    }

    /// Range-based standard deviation proxy `(max - min) / 4`. The backend never ships
    /// raw observations, so the true sample deviation is unavailable.
    pub fn refresh_dispersion(&mut self) {
        if self.has_min() && self.max >= self.min {
            self.std_dev = (self.max - self.min) / 4.0;
        }
        if self.avg > 0.0 {
            self.coeff_var = self.std_dev / self.avg * 100.0;
        }
    }

    /// Replaces the unused sentinel and derives throughput from the mean latency.
    pub fn finalize(&mut self) {
        if !self.has_min() {
            self.min = 0.0;
        }
        self.throughput = if self.avg > 0.0 {
            1000.0 / self.avg
        } else {
            0.0
        };
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionMetrics {
    pub connecting_ms: f64,
    pub tls_handshaking_ms: f64,
    pub waiting_ms: f64,
}

/// # Client Metrics
///
/// Per-client view of one run: a summary per RPC method plus the client-wide rollup.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClientMetrics {
    pub name: String,
    pub methods: BTreeMap<String, MetricSummary>,
    pub latency: MetricSummary,
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub connection: ConnectionMetrics,
    pub error_types: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<String, u64>,
}

impl ClientMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One point-in-time reading of host and process resources. Byte counters are deltas
/// since the previous sample.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SystemMetricsSample {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub network_sent_bytes: u64,
    pub network_received_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
    pub open_connections: u64,
    pub concurrent_tasks: u64,
}

/// Arithmetic mean of every numeric field over a set of samples.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SystemMetricsAverage {
    pub samples: usize,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub network_sent_bytes: f64,
    pub network_received_bytes: f64,
    pub disk_read_bytes: f64,
    pub disk_written_bytes: f64,
    pub open_connections: f64,
    pub concurrent_tasks: f64,
}

impl SystemMetricsAverage {
    pub fn new(samples: &[SystemMetricsSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let avg = |field: fn(&SystemMetricsSample) -> f64| -> f64 {
            samples.iter().map(field).sum::<f64>() / n
        };
        Self {
            samples: samples.len(),
            cpu_percent: avg(|s| s.cpu_percent),
            memory_mb: avg(|s| s.memory_mb),
            memory_percent: avg(|s| s.memory_percent),
            network_sent_bytes: avg(|s| s.network_sent_bytes as f64),
            network_received_bytes: avg(|s| s.network_received_bytes as f64),
            disk_read_bytes: avg(|s| s.disk_read_bytes as f64),
            disk_written_bytes: avg(|s| s.disk_written_bytes as f64),
            open_connections: avg(|s| s.open_connections as f64),
            concurrent_tasks: avg(|s| s.concurrent_tasks as f64),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EnvironmentInfo {
    pub os: String,
    pub os_version: String,
    pub kernel_version: String,
    pub hostname: String,
    pub arch: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub total_memory_mb: f64,
}

/// # Latency Distribution
///
/// Full distribution summary of a raw latency array (milliseconds, in recording order).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LatencyDistribution {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub coeff_var: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub iqr: f64,
    pub mad: f64,
    pub jitter: f64,
    pub outliers: Vec<Outlier>,
}

impl LatencyDistribution {
    pub fn new(observations: &[f64]) -> Self {
        if observations.is_empty() {
            return Self::default();
        }
        let mean = stats::mean(observations);
        let variance = stats::variance(observations, mean);
        let std_dev = variance.sqrt();
        Self {
            count: observations.len(),
            min: stats::percentile(observations, 0.0),
            max: stats::percentile(observations, 100.0),
            mean,
            p50: stats::percentile(observations, 50.0),
            p90: stats::percentile(observations, 90.0),
            p95: stats::percentile(observations, 95.0),
            p99: stats::percentile(observations, 99.0),
            variance,
            std_dev,
            coeff_var: stats::coeff_var(mean, std_dev),
            skewness: stats::skewness(observations, mean, std_dev),
            kurtosis: stats::kurtosis(observations, mean, std_dev),
            iqr: stats::iqr(observations),
            mad: stats::mad(observations),
            jitter: stats::jitter(observations),
            outliers: stats::detect_outliers(observations),
        }
    }
}

/// Raw latency arrays keyed by client then method.
pub type RawLatencies = BTreeMap<String, BTreeMap<String, Vec<f64>>>;
pub type Distributions = BTreeMap<String, BTreeMap<String, LatencyDistribution>>;

pub fn distributions(raw: &RawLatencies) -> Distributions {
    raw.iter()
        .map(|(client, methods)| {
            let methods = methods
                .iter()
                .map(|(method, values)| (method.clone(), LatencyDistribution::new(values)))
                .collect();
            (client.clone(), methods)
        })
        .collect()
}

/// # Run Report
///
/// Everything observed about one run, written by the observer and read by the assist tool.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport {
    pub configuration: json::Value,
    pub run_id: String,
    pub started_at: u64,
    pub finished_at: u64,
    pub reference_timestamp: u64,
    pub interrupted: bool,
    pub environment: EnvironmentInfo,
    pub clients: BTreeMap<String, ClientMetrics>,
    #[serde(default)]
    pub collection_error: Option<String>,
    pub system_samples: Vec<SystemMetricsSample>,
    pub system_average: SystemMetricsAverage,
    #[serde(default)]
    pub distributions: Distributions,
}
